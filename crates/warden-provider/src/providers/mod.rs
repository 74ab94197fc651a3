//! Provider implementations shipped with warden.

pub mod echo;
