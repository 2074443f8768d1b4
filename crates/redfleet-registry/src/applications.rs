//! Application registry.

use std::collections::BTreeMap;

use tracing::info;

use redfleet_state::{Application, ApplicationId, StateStore, SubjectKind};

use crate::audit::AuditTrail;
use crate::error::{RegistryError, RegistryResult};
use crate::validation::Validator;

pub const DEFAULT_COLOR: &str = "gray";

#[derive(Debug, Clone)]
pub struct NewApplication {
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub active: bool,
    pub metadata: BTreeMap<String, String>,
}

impl NewApplication {
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            description: None,
            color: None,
            icon: None,
            active: true,
            metadata: BTreeMap::new(),
        }
    }
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ApplicationPatch {
    pub slug: Option<String>,
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub color: Option<String>,
    pub icon: Option<Option<String>>,
    pub active: Option<bool>,
    pub metadata: Option<BTreeMap<String, String>>,
}

#[derive(Clone)]
pub struct ApplicationRegistry {
    store: StateStore,
    audit: AuditTrail,
}

impl ApplicationRegistry {
    pub fn new(store: StateStore, audit: AuditTrail) -> Self {
        Self { store, audit }
    }

    pub fn get(&self, id: ApplicationId) -> RegistryResult<Application> {
        self.store
            .get_application(id)?
            .ok_or_else(|| RegistryError::NotFound(format!("application {id}")))
    }

    pub fn get_by_slug(&self, slug: &str) -> RegistryResult<Application> {
        self.store
            .get_application_by_slug(slug)?
            .ok_or_else(|| RegistryError::NotFound(format!("application '{slug}'")))
    }

    /// Non-deleted applications ordered by name.
    pub fn list(&self, active_only: bool) -> RegistryResult<Vec<Application>> {
        let mut apps: Vec<_> = self
            .store
            .list_applications()?
            .into_iter()
            .filter(|a| !a.is_deleted() && (!active_only || a.active))
            .collect();
        apps.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(apps)
    }

    pub fn create(&self, input: NewApplication) -> RegistryResult<Application> {
        let mut v = Validator::new();
        v.slug("slug", &input.slug);
        v.require("name", &input.name);
        v.finish()?;

        let now = redfleet_core::epoch_secs();
        let app = Application {
            id: 0,
            slug: input.slug,
            name: input.name.trim().to_string(),
            description: input.description,
            color: input.color.unwrap_or_else(|| DEFAULT_COLOR.to_string()),
            icon: input.icon,
            active: input.active,
            metadata: input.metadata,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let app = self.store.insert_application(app)?;
        self.audit.created(SubjectKind::Application, app.id, &app);
        info!(id = app.id, slug = %app.slug, "application created");
        Ok(app)
    }

    pub fn update(&self, id: ApplicationId, patch: ApplicationPatch) -> RegistryResult<Application> {
        let old = self.get(id)?;

        let mut v = Validator::new();
        if let Some(slug) = &patch.slug {
            v.slug("slug", slug);
        }
        if let Some(name) = &patch.name {
            v.require("name", name);
        }
        if let Some(color) = &patch.color {
            v.require("color", color);
        }
        v.finish()?;

        let mut app = old.clone();
        if let Some(slug) = patch.slug {
            app.slug = slug;
        }
        if let Some(name) = patch.name {
            app.name = name.trim().to_string();
        }
        if let Some(description) = patch.description {
            app.description = description;
        }
        if let Some(color) = patch.color {
            app.color = color;
        }
        if let Some(icon) = patch.icon {
            app.icon = icon;
        }
        if let Some(active) = patch.active {
            app.active = active;
        }
        if let Some(metadata) = patch.metadata {
            app.metadata = metadata;
        }
        app.updated_at = redfleet_core::epoch_secs();

        self.store.put_application(&app)?;
        self.audit.updated(SubjectKind::Application, id, &old, &app);
        Ok(app)
    }

    pub fn soft_delete(&self, id: ApplicationId) -> RegistryResult<Application> {
        let mut app = self.get(id)?;
        if app.is_deleted() {
            return Ok(app);
        }
        let now = redfleet_core::epoch_secs();
        app.deleted_at = Some(now);
        app.updated_at = now;
        self.store.put_application(&app)?;
        self.audit.deleted(SubjectKind::Application, id, &app, false);
        info!(id, slug = %app.slug, "application soft-deleted");
        Ok(app)
    }

    pub fn restore(&self, id: ApplicationId) -> RegistryResult<Application> {
        let mut app = self.get(id)?;
        if !app.is_deleted() {
            return Ok(app);
        }
        app.deleted_at = None;
        app.updated_at = redfleet_core::epoch_secs();
        self.store.put_application(&app)?;
        self.audit.restored(SubjectKind::Application, id);
        info!(id, slug = %app.slug, "application restored");
        Ok(app)
    }

    /// Remove an application with its bindings and queue configurations.
    pub fn purge(&self, id: ApplicationId) -> RegistryResult<()> {
        let app = self.get(id)?;
        self.store.delete_application(id)?;
        self.audit.deleted(SubjectKind::Application, id, &app, true);
        info!(id, slug = %app.slug, "application purged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redfleet_state::AuditEvent;

    fn registry() -> ApplicationRegistry {
        let store = StateStore::open_in_memory().unwrap();
        ApplicationRegistry::new(store.clone(), AuditTrail::new(store))
    }

    #[test]
    fn create_applies_defaults() {
        let reg = registry();
        let app = reg.create(NewApplication::new("billing", "Billing")).unwrap();
        assert_eq!(app.color, DEFAULT_COLOR);
        assert!(app.active);
        assert_eq!(reg.get_by_slug("billing").unwrap().id, app.id);
    }

    #[test]
    fn invalid_slug_and_blank_name_are_both_reported() {
        let reg = registry();
        match reg.create(NewApplication::new("Not A Slug", " ")) {
            Err(RegistryError::Validation(err)) => {
                assert!(err.has("slug"));
                assert!(err.has("name"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_slug_is_a_conflict() {
        let reg = registry();
        reg.create(NewApplication::new("billing", "Billing")).unwrap();
        assert!(matches!(
            reg.create(NewApplication::new("billing", "Other")),
            Err(RegistryError::Conflict(_))
        ));
    }

    #[test]
    fn soft_delete_hides_and_restore_returns() {
        let reg = registry();
        let app = reg.create(NewApplication::new("billing", "Billing")).unwrap();
        reg.create(NewApplication::new("search", "Search")).unwrap();

        reg.soft_delete(app.id).unwrap();
        assert_eq!(reg.list(false).unwrap().len(), 1);
        // The row is kept.
        assert!(reg.get(app.id).unwrap().is_deleted());

        reg.restore(app.id).unwrap();
        assert_eq!(reg.list(false).unwrap().len(), 2);
    }

    #[test]
    fn list_active_only() {
        let reg = registry();
        let mut paused = NewApplication::new("paused", "Paused");
        paused.active = false;
        reg.create(paused).unwrap();
        reg.create(NewApplication::new("live", "Live")).unwrap();

        let active = reg.list(true).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].slug, "live");
    }

    #[test]
    fn update_is_audited_with_causer() {
        let store = StateStore::open_in_memory().unwrap();
        let audit = AuditTrail::new(store.clone()).acting_as("ops");
        let reg = ApplicationRegistry::new(store, audit.clone());

        let app = reg.create(NewApplication::new("billing", "Billing")).unwrap();
        reg.update(
            app.id,
            ApplicationPatch {
                color: Some("teal".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        let updates = audit.for_event(&AuditEvent::Updated).unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].causer.as_deref(), Some("ops"));
        assert_eq!(updates[0].properties["attributes"]["color"], "teal");
        assert_eq!(updates[0].properties["old"]["color"], "gray");
    }

    #[test]
    fn purge_deletes_row() {
        let reg = registry();
        let app = reg.create(NewApplication::new("billing", "Billing")).unwrap();
        reg.purge(app.id).unwrap();
        assert!(matches!(reg.get(app.id), Err(RegistryError::NotFound(_))));
    }
}
