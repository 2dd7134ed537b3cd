use crate::session::Session;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthState {
    Authenticated,
    Unauthenticated,
}

impl AuthState {
    pub fn of(session: Option<&Session>) -> AuthState {
        match session {
            Some(_) => AuthState::Authenticated,
            None => AuthState::Unauthenticated,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    Home,
    SignIn,
    Task(String),
}

impl Route {
    pub fn path(&self) -> String {
        match self {
            Route::Home => "/".to_string(),
            Route::SignIn => "/auth/sign-in".to_string(),
            Route::Task(id) => format!("/tasks/{}", id),
        }
    }

    pub fn required_auth(&self) -> AuthState {
        match self {
            Route::SignIn => AuthState::Unauthenticated,
            Route::Home | Route::Task(_) => AuthState::Authenticated,
        }
    }
}

/// Where to send the user instead, if the session doesn't match what the
/// screen requires.
pub fn protect_route(required: AuthState, session: Option<&Session>) -> Option<Route> {
    match (required, AuthState::of(session)) {
        (AuthState::Unauthenticated, AuthState::Authenticated) => Some(Route::Home),
        (AuthState::Authenticated, AuthState::Unauthenticated) => Some(Route::SignIn),
        _ => None,
    }
}
