pub mod export;
pub mod init;
pub mod query;
pub mod run;
pub mod summary;
pub mod version;

pub use export::Export;
pub use init::Init;
pub use query::Query;
pub use run::Run;
pub use summary::Summary;
pub use version::Version;
