use std::sync::Once;

use rand::{rngs::OsRng, RngCore};
use tessera_common::logging;
use tessera_primitives::prelude::*;

pub mod chain;
pub mod params;

static LOGGING: Once = Once::new();

/// Sets up logging once per test binary, filtered by `RUST_LOG`.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let mut config = logging::LoggerConfig::with_base_name("tessera-test");
        config.set_ansi(false);
        logging::init(config);
    });
}

pub fn rand_buf32() -> Buf32 {
    let mut buf = [0; 32];
    OsRng.fill_bytes(&mut buf);
    Buf32::from(buf)
}

pub fn rand_blkid() -> BlockId {
    BlockId::from(rand_buf32())
}
