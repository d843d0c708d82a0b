//! Model Context Protocol front end over stdio.
pub mod server;
pub mod tools;
