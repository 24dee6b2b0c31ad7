pub mod push;
pub mod remotes;
