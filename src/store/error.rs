use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("sample store not started")]
    NotStarted,
    #[error("sample store stopped")]
    Stopped,
}
