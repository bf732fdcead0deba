mod constants;
mod lobby;
mod record;
mod token;

pub use constants::*;
pub use lobby::*;
pub use record::*;
pub use token::*;
