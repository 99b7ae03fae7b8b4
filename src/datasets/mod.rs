mod ogbn;
pub use ogbn::*;

mod traits;
pub use traits::*;

mod utils;
pub use utils::{download_and_extract, read_csv_gz, RemoteFile};
