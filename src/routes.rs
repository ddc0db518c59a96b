//! View routing and the session guard.
//!
//! Every view except the login prompt requires an authenticated session.
//! The guard is a pure function of the requested route and the current
//! session phase, so the access rules are testable without any I/O.

use crate::auth::SessionPhase;

/// The views the console can show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Login,
    Dashboard,
    Nodes,
    NodeDetail(String),
    InstancePools,
}

impl Route {
    pub fn is_protected(&self) -> bool {
        !matches!(self, Route::Login)
    }
}

/// What to do with a requested route given the session phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    /// Show the requested view
    Allow,
    /// Session phase not settled yet; show nothing protected and wait
    Pending,
    /// Anonymous user asked for a protected view; send them to login and
    /// remember where they wanted to go
    RedirectToLogin { return_to: Route },
    /// Authenticated user asked for the login view; send them home
    RedirectHome,
}

pub fn guard(route: &Route, phase: SessionPhase) -> GuardOutcome {
    match phase {
        // Never render protected content, and never redirect, before the
        // session settles. A redirect here would bounce users who are about
        // to be restored from the persisted token.
        SessionPhase::Uninitialized | SessionPhase::Authenticating => GuardOutcome::Pending,
        SessionPhase::Anonymous => {
            if route.is_protected() {
                GuardOutcome::RedirectToLogin {
                    return_to: route.clone(),
                }
            } else {
                GuardOutcome::Allow
            }
        }
        SessionPhase::Authenticated => {
            if route.is_protected() {
                GuardOutcome::Allow
            } else {
                GuardOutcome::RedirectHome
            }
        }
    }
}
