pub mod inspect_cmd;
pub mod query_cmd;
pub mod verify_cmd;

pub use inspect_cmd::cmd_inspect;
pub use query_cmd::cmd_query;
pub use verify_cmd::cmd_verify;
