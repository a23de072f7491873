pub mod run_once;
pub mod urls;

pub use run_once::RunOnce;
pub use urls::UrlUtils;
