use chrono::{Duration, NaiveDateTime, Utc};
use diesel::prelude::*;
use tracing::{info, trace};

use super::models::{NewCourse, NewResetCode, NewSession, NewUser, ResetCode, User, UserInput};
use super::{Store, StorageError, ensure_location, schema};

/// Outcome of checking a submitted password reset code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetCodeCheck {
    Valid,
    /// No code on record, or it is older than the allowed lifetime.
    Expired,
    Mismatch { remaining: i32 },
    TooManyAttempts,
}

impl Store {
    // Admin accounts

    pub async fn list_users(&self) -> Result<Vec<User>, StorageError> {
        use schema::users::dsl::*;
        self.run(|conn| Ok(users.order(username.asc()).select(User::as_select()).load(conn)?))
            .await
    }

    pub async fn get_user(&self, user_id: i32) -> Result<Option<User>, StorageError> {
        use schema::users::dsl::*;
        self.run(move |conn| {
            Ok(users
                .find(user_id)
                .select(User::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    pub async fn find_user_by_username(&self, name: &str) -> Result<Option<User>, StorageError> {
        use schema::users::dsl::*;
        let name = name.trim().to_string();
        self.run(move |conn| {
            Ok(users
                .filter(username.eq(&name))
                .select(User::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    pub async fn find_user_by_email(&self, address: &str) -> Result<Option<User>, StorageError> {
        use schema::users::dsl::*;
        let address = address.trim().to_string();
        self.run(move |conn| {
            Ok(users
                .filter(email.eq(&address))
                .select(User::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    pub async fn count_users(&self) -> Result<i64, StorageError> {
        use schema::users::dsl::*;
        self.run(|conn| Ok(users.count().get_result(conn)?)).await
    }

    pub async fn create_user(&self, input: UserInput) -> Result<User, StorageError> {
        use schema::users;
        let input = normalize_user(input)?;
        let Some(hash) = input.password_hash.clone() else {
            return Err(StorageError::InvalidInput("Password is required".into()));
        };
        trace!(username = %input.username, "create_user starting");
        self.run(move |conn| {
            conn.immediate_transaction(|conn| -> Result<User, StorageError> {
                ensure_unique_account(conn, &input.username, &input.email, None)?;
                if let Some(lid) = input.location_id {
                    ensure_location(conn, lid)?;
                }
                Ok(diesel::insert_into(users::table)
                    .values(&NewUser {
                        username: &input.username,
                        email: &input.email,
                        first_name: &input.first_name,
                        last_name: &input.last_name,
                        phone: input.phone.as_deref(),
                        password_hash: &hash,
                        role: &input.role,
                        location_id: input.location_id,
                        image: input.image.as_deref(),
                    })
                    .returning(User::as_returning())
                    .get_result(conn)?)
            })
        })
        .await
    }

    pub async fn update_user(&self, user_id: i32, input: UserInput) -> Result<User, StorageError> {
        use schema::users;
        let input = normalize_user(input)?;
        self.run(move |conn| {
            conn.immediate_transaction(|conn| -> Result<User, StorageError> {
                let exists: i64 = users::table
                    .filter(users::id.eq(user_id))
                    .count()
                    .get_result(conn)?;
                if exists == 0 {
                    return Err(StorageError::NotFound(format!("admin {user_id}")));
                }
                ensure_unique_account(conn, &input.username, &input.email, Some(user_id))?;
                if let Some(lid) = input.location_id {
                    ensure_location(conn, lid)?;
                }
                diesel::update(users::table.find(user_id))
                    .set((
                        users::username.eq(&input.username),
                        users::email.eq(&input.email),
                        users::first_name.eq(&input.first_name),
                        users::last_name.eq(&input.last_name),
                        users::phone.eq(input.phone.as_deref()),
                        users::role.eq(&input.role),
                        users::location_id.eq(input.location_id),
                    ))
                    .execute(conn)?;
                if let Some(img) = input.image.as_deref() {
                    diesel::update(users::table.find(user_id))
                        .set(users::image.eq(img))
                        .execute(conn)?;
                }
                if let Some(hash) = input.password_hash.as_deref() {
                    diesel::update(users::table.find(user_id))
                        .set(users::password_hash.eq(hash))
                        .execute(conn)?;
                }
                Ok(users::table
                    .find(user_id)
                    .select(User::as_select())
                    .first(conn)?)
            })
        })
        .await
    }

    /// Deletes an admin account; its sessions go with it.
    pub async fn delete_user(&self, user_id: i32) -> Result<User, StorageError> {
        use schema::users;
        self.run(move |conn| {
            diesel::delete(users::table.find(user_id))
                .returning(User::as_returning())
                .get_result(conn)
                .optional()?
                .ok_or_else(|| StorageError::NotFound(format!("admin {user_id}")))
        })
        .await
    }

    /// Replaces the password hash for the account registered under `address`
    /// and revokes its sessions. Returns false when no such account exists.
    pub async fn set_password_for_email(
        &self,
        address: &str,
        hash: &str,
    ) -> Result<bool, StorageError> {
        use schema::{sessions, users};
        let address = address.trim().to_string();
        let hash = hash.to_string();
        self.run(move |conn| {
            conn.immediate_transaction(|conn| -> Result<bool, StorageError> {
                let user_id: Option<i32> = users::table
                    .filter(users::email.eq(&address))
                    .select(users::id)
                    .first(conn)
                    .optional()?;
                let Some(user_id) = user_id else {
                    return Ok(false);
                };
                diesel::update(users::table.find(user_id))
                    .set(users::password_hash.eq(&hash))
                    .execute(conn)?;
                diesel::delete(sessions::table.filter(sessions::user_id.eq(user_id)))
                    .execute(conn)?;
                Ok(true)
            })
        })
        .await
    }

    /// Creates the first admin when none exists and fills in missing courses.
    /// Returns whether an admin was created and how many courses were added.
    pub async fn seed_defaults(
        &self,
        admin: UserInput,
        course_names: &[&str],
    ) -> Result<(bool, usize), StorageError> {
        let mut admin_created = false;
        if self.count_users().await? == 0 {
            let user = self.create_user(admin).await?;
            info!(username = %user.username, "seeded default admin");
            admin_created = true;
        }
        let names: Vec<String> = course_names.iter().map(|s| s.to_string()).collect();
        let added = self
            .run(move |conn| {
                use schema::courses;
                let mut added = 0;
                for name in &names {
                    added += diesel::insert_into(courses::table)
                        .values(&NewCourse { course_name: name })
                        .on_conflict(courses::course_name)
                        .do_nothing()
                        .execute(conn)?;
                }
                Ok(added)
            })
            .await?;
        Ok((admin_created, added))
    }

    // Session helpers for JWT inactivity windows

    pub async fn create_session(&self, jti_: &str, user: i32) -> Result<(), StorageError> {
        use schema::sessions;
        let j = jti_.to_string();
        self.run(move |conn| {
            let now = Utc::now().naive_utc();
            diesel::insert_into(sessions::table)
                .values(&NewSession {
                    jti: &j,
                    user_id: user,
                    issued_at: now,
                    last_used_at: now,
                })
                .on_conflict_do_nothing()
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    pub async fn delete_session(&self, jti_: &str) -> Result<bool, StorageError> {
        use schema::sessions::dsl::*;
        let j = jti_.to_string();
        self.run(move |conn| {
            let deleted = diesel::delete(sessions.filter(jti.eq(&j))).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    /// Touch session atomically, but only if it hasn't gone idle.
    /// Returns `true` if the session was found and updated, `false` otherwise.
    pub async fn touch_session_with_cutoff(
        &self,
        jti_: &str,
        cutoff: NaiveDateTime,
    ) -> Result<bool, StorageError> {
        use schema::sessions::dsl::*;
        let j = jti_.to_string();
        self.run(move |conn| {
            let now = Utc::now().naive_utc();
            let updated =
                diesel::update(sessions.filter(jti.eq(&j)).filter(last_used_at.ge(cutoff)))
                    .set(last_used_at.eq(now))
                    .execute(conn)?;
            Ok(updated > 0)
        })
        .await
    }

    // Password reset codes

    /// Stores a fresh code for `address`, replacing any earlier one.
    pub async fn put_reset_code(
        &self,
        address: &str,
        code_: &str,
        now: NaiveDateTime,
    ) -> Result<(), StorageError> {
        use schema::password_reset_codes::dsl as rc;
        let address = address.trim().to_string();
        let code_ = code_.to_string();
        self.run(move |conn| {
            diesel::insert_into(rc::password_reset_codes)
                .values(&NewResetCode {
                    email: &address,
                    code: &code_,
                    created_at: now,
                    attempts: 0,
                    verified_at: None,
                })
                .on_conflict(rc::email)
                .do_update()
                .set((
                    rc::code.eq(&code_),
                    rc::created_at.eq(now),
                    rc::attempts.eq(0),
                    rc::verified_at.eq::<Option<NaiveDateTime>>(None),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    pub async fn clear_reset_code(&self, address: &str) -> Result<(), StorageError> {
        use schema::password_reset_codes::dsl as rc;
        let address = address.trim().to_string();
        self.run(move |conn| {
            diesel::delete(rc::password_reset_codes.filter(rc::email.eq(&address)))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    /// Checks `candidate` against the stored code, counting failed attempts.
    /// A successful check marks the code verified; it stays usable for the
    /// reset step until it expires.
    pub async fn verify_reset_code(
        &self,
        address: &str,
        candidate: &str,
        now: NaiveDateTime,
        ttl: Duration,
        max_attempts: i32,
    ) -> Result<ResetCodeCheck, StorageError> {
        use schema::password_reset_codes::dsl as rc;
        let address = address.trim().to_string();
        let candidate = candidate.trim().to_string();
        self.run(move |conn| {
            conn.immediate_transaction(|conn| -> Result<ResetCodeCheck, StorageError> {
                let Some(row) = rc::password_reset_codes
                    .find(address.as_str())
                    .select(ResetCode::as_select())
                    .first(conn)
                    .optional()?
                else {
                    return Ok(ResetCodeCheck::Expired);
                };
                if now - row.created_at > ttl {
                    diesel::delete(rc::password_reset_codes.find(address.as_str())).execute(conn)?;
                    return Ok(ResetCodeCheck::Expired);
                }
                if row.attempts >= max_attempts {
                    return Ok(ResetCodeCheck::TooManyAttempts);
                }
                if row.code != candidate {
                    let attempts = row.attempts + 1;
                    diesel::update(rc::password_reset_codes.find(address.as_str()))
                        .set(rc::attempts.eq(attempts))
                        .execute(conn)?;
                    if attempts >= max_attempts {
                        return Ok(ResetCodeCheck::TooManyAttempts);
                    }
                    return Ok(ResetCodeCheck::Mismatch {
                        remaining: max_attempts - attempts,
                    });
                }
                diesel::update(rc::password_reset_codes.find(address.as_str()))
                    .set(rc::verified_at.eq(Some(now)))
                    .execute(conn)?;
                Ok(ResetCodeCheck::Valid)
            })
        })
        .await
    }

    /// Consumes a verified, unexpired code. Returns false when the code was
    /// never verified, does not match, or has expired.
    pub async fn consume_reset_code(
        &self,
        address: &str,
        candidate: &str,
        now: NaiveDateTime,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        use schema::password_reset_codes::dsl as rc;
        let address = address.trim().to_string();
        let candidate = candidate.trim().to_string();
        self.run(move |conn| {
            conn.immediate_transaction(|conn| -> Result<bool, StorageError> {
                let Some(row) = rc::password_reset_codes
                    .find(address.as_str())
                    .select(ResetCode::as_select())
                    .first(conn)
                    .optional()?
                else {
                    return Ok(false);
                };
                let usable =
                    row.verified_at.is_some() && row.code == candidate && now - row.created_at <= ttl;
                if !usable {
                    return Ok(false);
                }
                diesel::delete(rc::password_reset_codes.find(address.as_str())).execute(conn)?;
                Ok(true)
            })
        })
        .await
    }
}

fn normalize_user(mut input: UserInput) -> Result<UserInput, StorageError> {
    for (value, field) in [
        (&mut input.username, "Username"),
        (&mut input.email, "Email"),
        (&mut input.first_name, "First name"),
        (&mut input.last_name, "Last name"),
    ] {
        *value = value.trim().to_string();
        if value.is_empty() {
            return Err(StorageError::InvalidInput(format!("{field} is required")));
        }
    }
    if !input.email.contains('@') {
        return Err(StorageError::InvalidInput("Email address is not valid".into()));
    }
    input.phone = input
        .phone
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());
    input.image = input
        .image
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());
    Ok(input)
}

fn ensure_unique_account(
    conn: &mut SqliteConnection,
    name: &str,
    address: &str,
    except: Option<i32>,
) -> Result<(), StorageError> {
    use schema::users;
    let mut q = users::table
        .filter(users::username.eq(name).or(users::email.eq(address)))
        .into_boxed();
    if let Some(id) = except {
        q = q.filter(users::id.ne(id));
    }
    let taken: i64 = q.count().get_result(conn)?;
    if taken > 0 {
        return Err(StorageError::Conflict(
            "Username or email already exists!".to_string(),
        ));
    }
    Ok(())
}
