//! Domain models for `nblm`.

mod credential;
mod state;
mod value;

pub use credential::{
    Credential, ESSENTIAL_COOKIES, REQUIRED_COOKIES, filter_essential, parse_cookie_header,
};
pub use state::RecoveryState;
pub use value::{RpcNumber, RpcValue};

#[cfg(test)]
mod serde_tests;
