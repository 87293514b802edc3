//! CLI command implementations

mod config;
mod list;
mod passwd;
mod serve;
mod set;
mod status;
mod stop;

pub use config::{config, ConfigArgs};
pub use list::{list, ListArgs};
pub use passwd::{passwd, PasswdArgs};
pub use serve::{serve, ServeArgs};
pub use set::{set, SetArgs};
pub use status::status;
pub use stop::stop;
