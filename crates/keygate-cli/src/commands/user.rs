//! User management commands.

use anyhow::{Result, anyhow};
use keygate_core::{Config, PermissionCatalog};
use keygate_gateway::auth::generate_password;
use keygate_gateway::{User, UserStore, load_catalog};

use crate::ui;

/// Role that may not lose its last active holder.
const ADMIN_ROLE: &str = "admin";

/// User actions.
#[derive(Debug, Clone)]
pub enum UserAction {
    /// Create a new user.
    Create {
        email: String,
        role: String,
        password: Option<String>,
        generate_password: bool,
    },
    /// List all users.
    List,
    /// Replace a user's password with a generated one.
    ResetPassword { email: String },
    /// Enable a user account.
    Enable { email: String },
    /// Disable a user account.
    Disable { email: String },
    /// Delete a user.
    Delete { email: String },
}

/// Run a user command against the configured data directory.
///
/// # Errors
///
/// Returns error if the store cannot be opened or the operation fails.
pub fn run_user(config: &Config, action: UserAction) -> Result<()> {
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let store = UserStore::open(&data_dir)
        .map_err(|e| anyhow!("Failed to open user store: {e}"))?;

    match action {
        UserAction::Create {
            email,
            role,
            password,
            generate_password: gen_pwd,
        } => {
            let catalog = load_catalog(config)?;
            let password = match (password, gen_pwd) {
                (_, true) => {
                    let pwd = generate_password(16);
                    ui::success(&format!("Generated password: {pwd}"));
                    pwd
                }
                (Some(pwd), false) => pwd,
                (None, false) => ui::password("Password")?,
            };
            create_user(&store, &catalog, &email, &password, &role)?;
        }
        UserAction::List => list_users(&store)?,
        UserAction::ResetPassword { email } => {
            let password = reset_password(&store, &email)?;
            ui::success(&format!("New password: {password}"));
        }
        UserAction::Enable { email } => set_user_active(&store, &email, true)?,
        UserAction::Disable { email } => set_user_active(&store, &email, false)?,
        UserAction::Delete { email } => delete_user(&store, &email)?,
    }

    Ok(())
}

fn create_user(
    store: &UserStore,
    catalog: &PermissionCatalog,
    email: &str,
    password: &str,
    role: &str,
) -> Result<()> {
    let grants = catalog.grants_for(role).map_err(|_| {
        let known = catalog
            .roles()
            .iter()
            .map(|r| r.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        anyhow!("Invalid role: {role}. Use one of: {known}")
    })?;
    if password.is_empty() {
        return Err(anyhow!("Password must not be empty"));
    }

    let user = User::new(email, password, role)
        .map_err(|e| anyhow!("Failed to create user: {e}"))?;
    store
        .create(&user)
        .map_err(|e| anyhow!("Failed to save user: {e}"))?;

    ui::success(&format!(
        "Created user '{}' with role '{}' ({} permissions)",
        user.email,
        role,
        grants.len()
    ));
    Ok(())
}

fn list_users(store: &UserStore) -> Result<()> {
    let users = store
        .list()
        .map_err(|e| anyhow!("Failed to list users: {e}"))?;

    if users.is_empty() {
        ui::info("No users configured.");
        ui::info("Run 'keygate user create --email you@example.com --role admin --generate-password'.");
        return Ok(());
    }

    ui::info(&format!("Users ({}):", users.len()));
    println!();
    println!(
        "{:<32} {:<10} {:<8} {:<20} {:<20}",
        "EMAIL", "ROLE", "ACTIVE", "CREATED", "LAST LOGIN"
    );
    println!("{}", "-".repeat(92));

    for user in users {
        let created = user.created_at.format("%Y-%m-%d %H:%M:%S").to_string();
        let last_login = user
            .last_login
            .map_or_else(|| "never".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
        let active = if user.active { "yes" } else { "no" };
        println!(
            "{:<32} {:<10} {:<8} {:<20} {:<20}",
            user.email, user.role, active, created, last_login
        );
    }

    Ok(())
}

fn reset_password(store: &UserStore, email: &str) -> Result<String> {
    let mut user = store
        .get_by_email(email)
        .map_err(|e| anyhow!("Failed to find user: {e}"))?
        .ok_or_else(|| anyhow!("User not found: {email}"))?;

    let new_password = generate_password(16);
    user.set_password(&new_password)
        .map_err(|e| anyhow!("Failed to set password: {e}"))?;
    store
        .update(&user)
        .map_err(|e| anyhow!("Failed to update user: {e}"))?;

    ui::success(&format!("Password reset for user '{}'", user.email));
    Ok(new_password)
}

fn set_user_active(store: &UserStore, email: &str, active: bool) -> Result<()> {
    if !active {
        ensure_not_last_admin(store, email)?;
    }
    let user = store
        .set_active(email, active)
        .map_err(|e| anyhow!("Failed to update user: {e}"))?;

    let status = if active { "enabled" } else { "disabled" };
    ui::success(&format!("User '{}' {}", user.email, status));
    Ok(())
}

fn delete_user(store: &UserStore, email: &str) -> Result<()> {
    ensure_not_last_admin(store, email)?;
    let deleted = store
        .delete(email)
        .map_err(|e| anyhow!("Failed to delete user: {e}"))?;
    if !deleted {
        return Err(anyhow!("User not found: {email}"));
    }

    ui::success(&format!("Deleted user '{email}'"));
    ui::warning("Tokens already issued to this user stay valid until they expire or are revoked.");
    Ok(())
}

fn ensure_not_last_admin(store: &UserStore, email: &str) -> Result<()> {
    let user = store
        .get_by_email(email)
        .map_err(|e| anyhow!("Failed to find user: {e}"))?
        .ok_or_else(|| anyhow!("User not found: {email}"))?;
    if user.role != ADMIN_ROLE || !user.active {
        return Ok(());
    }

    let admins = store
        .list()
        .map_err(|e| anyhow!("Failed to list users: {e}"))?
        .iter()
        .filter(|u| u.role == ADMIN_ROLE && u.active)
        .count();
    if admins <= 1 {
        return Err(anyhow!("Cannot remove the last active admin user"));
    }
    Ok(())
}
