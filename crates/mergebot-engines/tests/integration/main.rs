//! Integration tests for mergebot-engines
//!
//! Uses wiremock to stand in for the engine services and checks the wire
//! shapes the clients send and accept, plus the collectors end to end.

mod common;

mod test_clients;
mod test_collect;
