// Core modules for the redrelay server
pub mod buffer; // Outbound reply frame queue
pub mod console; // Operator stdin + script replay
pub mod engine; // Backend interface + local engine
pub mod logger; // Traffic log with hex escaping
pub mod monitor; // Transparent MITM relay
pub mod net; // bind_reuseport + run_server (event loop)
pub mod protocol; // RESP decoder + keyword tables + encoders
pub mod session; // Per-connection dispatcher (MULTI/EXEC, routing)
pub mod storage; // Dict + Value for the in-memory engine
pub mod upstream; // Proxy engine toward a real Redis
pub mod wildcard; // Glob matcher for SCAN

// Re-export all public items from modules for easier access
pub use buffer::*;
pub use console::*;
pub use engine::*;
pub use logger::*;
pub use monitor::*;
pub use net::*;
pub use protocol::*;
pub use session::*;
pub use storage::*;
pub use upstream::*;
pub use wildcard::*;

// Default listen address - the standard Redis port
pub const DEFAULT_ADDR: &str = "0.0.0.0:6379";

// Alternate listen port used when monitoring an upstream on 6379
pub const MONITOR_PORT: u16 = 3010;

// Default upstream Redis address for proxy and monitor modes
pub const DEFAULT_UPSTREAM: &str = "127.0.0.1:6379";
