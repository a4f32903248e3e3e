use closet_auth::Role;
use closet_core::UserId;

/// Authenticated caller for a request.
///
/// Inserted by the auth middleware; every `/api` handler is scoped by its `user_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    user_id: UserId,
    roles: Vec<Role>,
}

impl UserContext {
    pub fn new(user_id: UserId, roles: Vec<Role>) -> Self {
        Self { user_id, roles }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
