//! Reddit OAuth endpoints
//!
//! Reddit's authorization server is fixed; there is no discovery step.

/// Authorization endpoint the user's browser is sent to
pub const AUTHORIZE_ENDPOINT: &str = "https://www.reddit.com/api/v1/authorize";

/// Token endpoint for the server-to-server code exchange
pub const TOKEN_ENDPOINT: &str = "https://www.reddit.com/api/v1/access_token";

/// Scopes requested on every login. `submit` allows posting, `identity`
/// lets us look up the account name later.
pub const SCOPES: &str = "submit,identity";

/// Request a refresh token along with the access token.
pub const DURATION: &str = "permanent";
