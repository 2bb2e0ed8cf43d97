//! CLI Commands

mod init;
mod inspect;
mod simulate;

pub use init::InitCommand;
pub use inspect::InspectCommand;
pub use simulate::SimulateCommand;
