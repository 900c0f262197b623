//! External delivery channels for end-of-analysis notifications.

pub mod email;
