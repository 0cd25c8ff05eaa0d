//! # lambda-batch CLI
//!
//! Command-line interface for batch detector integration.
//!
//! ## Usage
//! ```bash
//! lambda-batch process scan_00042.nxs --calibration ceo2.poni --output-dir processed
//! lambda-batch watch /dls/i15-1/data/2026/cm12345-1 --output json
//! ```

mod cli;

use lambda_batch::Result;

fn main() -> Result<()> {
    cli::run()
}
