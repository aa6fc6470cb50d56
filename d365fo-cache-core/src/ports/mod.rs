// d365fo-cache-core/src/ports/mod.rs
//
// These traits are what the core *needs*, without knowing how it's done —
// same role as the teacher's `ports::connector::Connector`. Token
// acquisition, HTTP transport, wall-clock time and the cache directory root
// are all external collaborators; the core only ever talks
// to these interfaces.

pub mod clock;
pub mod fs_root;
pub mod odata;
pub mod token;

pub use clock::{Clock, SystemClock};
pub use fs_root::FsRoot;
pub use odata::{HttpError, ODataClient};
pub use token::{AuthError, TokenProvider};
