pub mod remote;
pub mod tracks;
