mod credentials;
mod error;
mod station_data;
mod subset;
mod wile;
mod workspace;

pub use error::WileError;
pub use wile::*;

pub use credentials::*;
pub use workspace::*;

pub use station_data::client::*;
pub use station_data::error::StationDataError;
pub use station_data::frame::*;
pub use station_data::history::*;

pub use subset::client::*;
pub use subset::error::SubsetError;
pub use subset::wsp::*;
