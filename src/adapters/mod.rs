pub mod command;
pub mod net;
pub mod process_table;
pub mod service_manager;
pub mod traits;
pub mod webhook;

pub use command::TokioCommandRunner;
pub use net::{ReqwestProbe, TcpDialer};
pub use process_table::SystemProcessLister;
pub use service_manager::{resolve_init_system, InitSystem, ServiceManager};
pub use traits::{CommandOutput, CommandRunner, HttpProbe, PortDialer, ProcessLister};
pub use webhook::{local_hostname, WebhookPayload, WebhookSink};
