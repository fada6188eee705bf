#[derive(Debug, thiserror::Error)]
pub enum TagError {
    #[error("line {0} is not a tag line")]
    BadTagLine(usize),

    #[error("section has too many fields")]
    SectionTooLarge,

    #[error(transparent)]
    Io(#[from] depot_io::IoError),
}

pub type Result<T> = std::result::Result<T, TagError>;
