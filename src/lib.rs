pub mod delivery;
pub mod protocol;
pub mod test_util;
