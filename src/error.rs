use crate::credentials::CredentialError;
use crate::station_data::error::StationDataError;
use crate::subset::error::SubsetError;
use crate::workspace::WorkspaceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WileError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    StationData(#[from] StationDataError),

    #[error(transparent)]
    Subset(#[from] SubsetError),
}
