pub mod application_private_data;
pub mod create_pipeline;
pub mod error_record;
pub mod host_call;
pub mod init_runspace_pool;
pub mod pipeline_io;
pub mod pipeline_state;
pub mod runspace_pool_state;
pub mod session_capability;

pub use application_private_data::*;
pub use create_pipeline::*;
pub use error_record::*;
pub use host_call::*;
pub use init_runspace_pool::*;
pub use pipeline_io::*;
pub use pipeline_state::*;
pub use runspace_pool_state::*;
pub use session_capability::*;
