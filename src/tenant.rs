use tracing::warn;

use crate::types::{Diagnostic, EnrichedSchema, TenantOverride};

/// Merge `overrides` onto the content attributes of `schema`'s fields.
///
/// Label, placeholder, help and default are replaced when set. Each override
/// validation rule replaces the field's rule of the same kind or is appended.
/// Runtime state is never touched. Overrides for an unknown field, or for a
/// schema or tenant other than `schema`'s, are dropped with a diagnostic.
pub fn apply_overrides(schema: &mut EnrichedSchema, overrides: &[TenantOverride]) {
    for o in overrides {
        let reason = if o.schema_id != schema.schema_id {
            Some(format!("override targets schema '{}'", o.schema_id))
        } else if o.tenant_id != schema.tenant_id {
            Some(format!("override belongs to tenant '{}'", o.tenant_id))
        } else {
            None
        };
        if let Some(reason) = reason {
            drop_override(schema, o, reason);
            continue;
        }

        let Some(enriched) = schema
            .fields
            .iter_mut()
            .find(|f| f.field.name == o.field_name)
        else {
            drop_override(schema, o, "no such field".to_owned());
            continue;
        };

        let field = &mut enriched.field;
        if let Some(label) = &o.label {
            field.label = Some(label.clone());
        }
        if let Some(placeholder) = &o.placeholder {
            field.placeholder = Some(placeholder.clone());
        }
        if let Some(help) = &o.help {
            field.help = Some(help.clone());
        }
        if let Some(default) = &o.default {
            field.default = Some(default.clone());
        }
        for rule in o.validation.iter() {
            field.validation.override_with(rule.clone());
        }
    }
}

fn drop_override(schema: &mut EnrichedSchema, o: &TenantOverride, reason: String) {
    warn!(
        schema = %schema.schema_id,
        tenant = %schema.tenant_id,
        field = %o.field_name,
        %reason,
        "dropping tenant override"
    );
    schema.diagnostics.push(Diagnostic::OverrideDropped {
        field: o.field_name.clone(),
        reason,
    });
}
