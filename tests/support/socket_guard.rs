//! Skips wiremock-backed tests on hosts that cannot bind a loopback socket.
//!
//! Set `TRANSFER_REQUIRE_SOCKET_TESTS=1` in CI to turn a skip into a failure.

use std::net::TcpListener;
use std::panic::Location;

use wiremock::MockServer;

const REQUIRE_ENV: &str = "TRANSFER_REQUIRE_SOCKET_TESTS";

fn sockets_required() -> bool {
    std::env::var(REQUIRE_ENV)
        .is_ok_and(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

/// Starts a mock server, or returns `None` (after saying why) when loopback
/// sockets are unavailable.
#[track_caller]
pub fn start_mock_server_or_skip() -> impl Future<Output = Option<MockServer>> {
    let caller = Location::caller();
    let available = TcpListener::bind("127.0.0.1:0").is_ok();
    if !available {
        let message = format!(
            "[socket-bound-test] {}:{} needs a loopback socket and none could be bound",
            caller.file(),
            caller.line()
        );
        assert!(!sockets_required(), "{message} ({REQUIRE_ENV} is set)");
        eprintln!("{message}; skipping");
    }
    async move {
        if available {
            Some(MockServer::start().await)
        } else {
            None
        }
    }
}
