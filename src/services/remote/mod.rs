pub mod client;

pub use client::RemoteHttpAdapter;
