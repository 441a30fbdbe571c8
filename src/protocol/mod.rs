pub mod codec;
pub mod framing;
pub mod packet;
