use uuid::Uuid;

use crate::{Error, STUB_UUID};

pub const BCRYPT_COST: u32 = 10;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn stub() -> UserId {
        UserId(STUB_UUID)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub is_admin: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewUser {
    pub id: UserId,
    pub name: String,
    pub initial_password_hash: String,
    #[serde(default)]
    pub is_admin: bool,
}

impl NewUser {
    pub fn new(id: UserId, name: String, initial_password: String, is_admin: bool) -> NewUser {
        NewUser {
            id,
            name,
            initial_password_hash: bcrypt::hash(initial_password, BCRYPT_COST)
                .expect("failed hashing password"),
            is_admin,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_name(&self.name)?;
        crate::validate_string(&self.initial_password_hash)?;
        Ok(())
    }
}
