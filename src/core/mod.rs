pub mod app;
pub mod driver;
pub mod elevation;
pub mod profile;
pub mod reload;
pub mod settings;
pub mod supervisor;

pub use app::App;
pub use profile::{ProfileRecord, ProfileStore};
pub use settings::AppConfig;
pub use supervisor::CoreSupervisor;
