//! Agora, a server-rendered discussion forum. The engineering core is the
//! in-memory session store and the request-admission path; the rest of the
//! application consumes them through the middleware chain.

pub mod agora;
pub mod cli;
