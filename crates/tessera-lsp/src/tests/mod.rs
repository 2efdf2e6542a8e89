//! End-to-end tests of the session manager against scripted servers.

mod support;
