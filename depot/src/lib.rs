pub mod agent;
pub mod fetch;
pub mod filter;
pub mod planner;
pub mod reconcile;

pub use agent::DepotDownloadAgent;
pub use fetch::ManifestFetcher;
pub use filter::InstallFilter;
pub use planner::{PlannedDepot, Planner};
pub use reconcile::{DepotWork, reconcile_depot};
