//! External delivery channels for job results.

pub mod webhook;
