use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::handlers::{AutoScheduleRequest, QuickAddRequest};
use crate::models::{ClassInstance, ClassTemplate, CreationSource, InstanceStatus, TemplateDraft};

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
        components.add_security_scheme(
            "query_token",
            SecurityScheme::ApiKey(ApiKey::Query(ApiKeyValue::new("token"))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz_live,
        crate::handlers::healthz_ready,
        crate::handlers::list_templates,
        crate::handlers::create_template,
        crate::handlers::get_template,
        crate::handlers::set_auto_schedule,
        crate::handlers::quick_add,
        crate::handlers::run_catch_up,
        crate::handlers::list_instances,
        crate::handlers::get_ical
    ),
    components(schemas(
        ClassTemplate,
        TemplateDraft,
        ClassInstance,
        InstanceStatus,
        CreationSource,
        AutoScheduleRequest,
        QuickAddRequest
    )),
    tags(
        (name = "templates", description = "Recurring class templates"),
        (name = "schedule", description = "Generated class schedule")
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_schedule_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/templates/{id}/quick-add"));
        assert!(doc.paths.paths.contains_key("/schedule/catch-up"));
        let components = doc.components.unwrap();
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
