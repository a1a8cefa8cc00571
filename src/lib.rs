//! archon: unified entry point for the archon workspace.
//! Re-exports the internal crates so consumers can write
//! `archon::scheduler::...`, `archon::hub::...`, etc.

pub mod prelude;

pub mod common {
    pub use ::common::*;
}
pub mod errors {
    pub use ::errors::*;
}
pub mod utils {
    pub use ::utils::*;
}
pub mod scheduler {
    pub use ::scheduler::*;
}
pub mod ledger {
    pub use ::ledger::*;
}
pub mod hub {
    pub use ::hub::*;
}
