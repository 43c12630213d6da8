/*!
# ParkSync DevKit - test tooling for the sync layer

- `StubResource`: in-memory RemoteResource with held requests and scripted failures
- `MockParkApi`: axum mock of the park/ecological API on a loopback port
- `ParkRecords`: record fixtures in the backends' shapes
- `TestHarness`: logging, mock API and matching SyncConfig in one call
*/

pub mod fixtures;
pub mod mock_api;
pub mod stub_resource;
pub mod test_utils;

pub use fixtures::ParkRecords;
pub use mock_api::{AckStyle, EnvelopeStyle, MockParkApi};
pub use stub_resource::StubResource;
pub use test_utils::TestHarness;
