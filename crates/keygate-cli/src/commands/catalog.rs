//! Catalog commands - inspect and audit permissions and roles.

use anyhow::Result;
use keygate_core::{CatalogError, Config, PermissionCatalog};
use keygate_gateway::load_catalog;

use crate::ui;

/// Catalog actions.
#[derive(Debug, Clone, Copy)]
pub enum CatalogAction {
    /// Print permissions and roles.
    List,
    /// Run the self-audit.
    Audit,
}

/// Run a catalog command.
///
/// # Errors
///
/// Returns error if the catalog cannot be loaded or fails its audit.
pub fn run_catalog(config: &Config, action: CatalogAction) -> Result<()> {
    let catalog = load_catalog(config)?;
    match action {
        CatalogAction::List => {
            list_catalog(&catalog);
            Ok(())
        }
        CatalogAction::Audit => audit_catalog(&catalog),
    }
}

fn list_catalog(catalog: &PermissionCatalog) {
    ui::header(&format!("Permissions ({})", catalog.all().len()));
    println!("{:<6} {:<28} DESCRIPTION", "ID", "NAME");
    println!("{}", "-".repeat(70));
    for permission in catalog.all() {
        println!(
            "{:<6} {:<28} {}",
            permission.id, permission.name, permission.description
        );
    }

    ui::header(&format!("Roles ({})", catalog.roles().len()));
    println!("{:<6} {:<16} PERMISSIONS", "ID", "NAME");
    println!("{}", "-".repeat(70));
    for role in catalog.roles() {
        let grants = role
            .permissions
            .iter()
            .map(|id| match catalog.by_id(*id) {
                Ok(permission) => permission.name.clone(),
                Err(_) => format!("#{id}?"),
            })
            .collect::<Vec<_>>()
            .join(", ");
        println!("{:<6} {:<16} {}", role.id, role.name, grants);
    }
}

fn audit_catalog(catalog: &PermissionCatalog) -> Result<()> {
    match catalog.self_audit() {
        Ok(()) => {
            ui::success(&format!(
                "Catalog audit passed: {} permissions, {} roles",
                catalog.all().len(),
                catalog.roles().len()
            ));
            Ok(())
        }
        Err(CatalogError::AuditFailed(issues)) => {
            ui::error(&format!("Catalog audit found {} issue(s):", issues.len()));
            for issue in &issues {
                ui::warning(&format!("  {issue}"));
            }
            anyhow::bail!("catalog audit failed")
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keygate_core::{Permission, Role};

    #[test]
    fn test_audit_builtin_passes() {
        assert!(audit_catalog(&PermissionCatalog::builtin()).is_ok());
    }

    #[test]
    fn test_audit_reports_unknown_grant() {
        let catalog = PermissionCatalog::new(
            vec![Permission::new(1, "a", "")],
            vec![Role::new(1, "r", vec![1, 40])],
        );
        assert!(audit_catalog(&catalog).is_err());
    }

    #[test]
    fn test_run_catalog_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            catalog_path: Some(dir.path().join("missing.json5")),
            ..Config::default()
        };
        assert!(run_catalog(&config, CatalogAction::List).is_err());
    }
}
