//! Step functions bound to workflow step names.
//!
//! Every step reads and writes the [`WorkflowContext`]; its outcome is stored
//! in shared state under the step name by the engine.

use futures::future::BoxFuture;

use docflow_engine::{CapabilityRegistry, FlowContext, FlowResult, StepOutcome};

use crate::client::DocumentUpdate;
use crate::context::{DocumentTask, RunSettings, WorkflowContext};
use crate::resolve::category::find_category;
use crate::resolve::identity::sentinel_identity;
use crate::resolve::{
    CategoryClassifier, DescriptionWriter, IdentityResolution, IdentityResolver, ProviderResolution,
    ProviderResolver,
};

pub const EXTRACT_TEXT: &str = "extract_text";
pub const GET_CATEGORY_TYPES: &str = "get_category_types";
pub const GET_CATEGORY_TYPE: &str = "get_category_type";
pub const GET_DOCUMENT_DESCRIPTION: &str = "get_document_description";
pub const RESOLVE_PATIENT: &str = "resolve_patient";
pub const UNIDENTIFIED_PATIENT: &str = "unidentified_patient";
pub const GET_PROVIDER: &str = "get_provider";
pub const UPDATE_DOCUMENT: &str = "update_document";

/// Shared state key holding the error manager to notify after a provider fallback.
pub const ERROR_MANAGER_KEY: &str = "error_manager";

/// Registry with every step the worker provides.
pub fn build_registry() -> CapabilityRegistry<WorkflowContext> {
    let mut registry = CapabilityRegistry::new();
    registry.register_fn(EXTRACT_TEXT, extract_text);
    registry.register_fn(GET_CATEGORY_TYPES, get_category_types);
    registry.register_fn(GET_CATEGORY_TYPE, get_category_type);
    registry.register_fn(GET_DOCUMENT_DESCRIPTION, get_document_description);
    registry.register_fn(RESOLVE_PATIENT, resolve_patient);
    registry.register_fn(UNIDENTIFIED_PATIENT, unidentified_patient);
    registry.register_fn(GET_PROVIDER, get_provider);
    registry.register_fn(UPDATE_DOCUMENT, update_document);
    registry
}

fn extract_text(ctx: &mut WorkflowContext) -> BoxFuture<'_, FlowResult<StepOutcome>> {
    Box::pin(async move {
        let text = ctx.services.extractor.extract(&ctx.task.bytes).await?;
        let text = text.trim().to_string();
        if text.is_empty() {
            tracing::warn!(document_id = %ctx.task.document_id, "No text extracted");
            return Ok(StepOutcome::failure());
        }

        tracing::debug!(document_id = %ctx.task.document_id, chars = text.len(), "Text extracted");
        ctx.task.evidence = Some(text);
        Ok(StepOutcome::success())
    })
}

fn get_category_types(ctx: &mut WorkflowContext) -> BoxFuture<'_, FlowResult<StepOutcome>> {
    Box::pin(async move {
        let assessment = classifier(ctx).describe(ctx.task.evidence()).await?;
        Ok(StepOutcome::with_payload(assessment))
    })
}

fn get_category_type(ctx: &mut WorkflowContext) -> BoxFuture<'_, FlowResult<StepOutcome>> {
    Box::pin(async move {
        let assessment = ctx
            .shared_state()
            .get_str(GET_CATEGORY_TYPES)
            .unwrap_or_else(|| ctx.task.evidence().to_string());
        let category = classifier(ctx).classify(&assessment).await?;
        if category.is_empty() {
            tracing::warn!(document_id = %ctx.task.document_id, "No category and no default category");
            return Ok(StepOutcome::failure());
        }

        tracing::info!(document_id = %ctx.task.document_id, category = %category, "Document categorized");
        ctx.task.category = Some(category.clone());
        Ok(StepOutcome::with_payload(category))
    })
}

fn get_document_description(ctx: &mut WorkflowContext) -> BoxFuture<'_, FlowResult<StepOutcome>> {
    Box::pin(async move {
        let settings = ctx.settings.clone();
        let Some(category) = ctx
            .task
            .category
            .as_deref()
            .and_then(|name| find_category(&settings.categories, name))
        else {
            return Ok(StepOutcome::failure());
        };

        let writer = DescriptionWriter::new(ctx.prompter());
        let Some(description) = writer.write(category, ctx.task.evidence()).await? else {
            return Ok(StepOutcome::failure());
        };

        for (key, answer) in &description.steps {
            ctx.shared_state_mut().set_payload(key.clone(), answer.clone());
        }
        let text = description.text.trim_start().to_string();
        ctx.task.description = Some(text.clone());
        Ok(StepOutcome::with_payload(text))
    })
}

fn resolve_patient(ctx: &mut WorkflowContext) -> BoxFuture<'_, FlowResult<StepOutcome>> {
    Box::pin(async move {
        let resolver = IdentityResolver::new(
            ctx.services.directory.as_ref(),
            ctx.prompter(),
            &ctx.settings.prompts,
        );
        let resolution = resolver.resolve(ctx.task.evidence()).await?;

        match resolution {
            IdentityResolution::Resolved { candidate, basis } => {
                tracing::info!(
                    document_id = %ctx.task.document_id,
                    demographic_no = %candidate.demographic_no,
                    basis = ?basis,
                    "Patient resolved"
                );
                let payload = serde_json::to_value(&candidate)?;
                ctx.task.patient = Some(candidate);
                Ok(StepOutcome::with_payload(payload))
            }
            IdentityResolution::Unresolved => {
                tracing::info!(document_id = %ctx.task.document_id, "Patient not identified");
                Ok(StepOutcome::failure())
            }
        }
    })
}

fn unidentified_patient(ctx: &mut WorkflowContext) -> BoxFuture<'_, FlowResult<StepOutcome>> {
    Box::pin(async move {
        let sentinel = sentinel_identity(&ctx.settings.defaults);
        if sentinel.demographic_no.is_empty() {
            tracing::warn!(document_id = %ctx.task.document_id, "No unidentified patient configured");
            return Ok(StepOutcome::failure());
        }

        ctx.task.patient = Some(sentinel);
        ctx.task.needs_review = true;
        Ok(StepOutcome::success())
    })
}

fn get_provider(ctx: &mut WorkflowContext) -> BoxFuture<'_, FlowResult<StepOutcome>> {
    Box::pin(async move {
        let resolver = ProviderResolver::new(
            ctx.services.directory.as_ref(),
            ctx.prompter(),
            &ctx.settings.prompts,
            &ctx.settings.defaults,
        );
        let resolution = resolver.resolve(ctx.task.evidence()).await?;

        let provider_id = resolution.provider_id().to_string();
        if let ProviderResolution::Fallback {
            error_manager: Some(manager),
            ..
        } = &resolution
        {
            ctx.shared_state_mut()
                .set_payload(ERROR_MANAGER_KEY, manager.clone());
        }

        tracing::debug!(document_id = %ctx.task.document_id, provider = %provider_id, "Provider selected");
        ctx.task.provider_ids.push(provider_id.clone());
        Ok(StepOutcome::with_payload(provider_id))
    })
}

fn update_document(ctx: &mut WorkflowContext) -> BoxFuture<'_, FlowResult<StepOutcome>> {
    Box::pin(async move {
        let today = chrono::Local::now().date_naive();
        let Some(update) = build_update(&ctx.task, &ctx.settings, today) else {
            tracing::error!(document_id = %ctx.task.document_id, "Missing patient or category, not tagging");
            return Ok(StepOutcome::failure());
        };

        let accepted = ctx.services.directory.update_document(&update).await?;
        if accepted {
            tracing::info!(
                document_id = %ctx.task.document_id,
                demographic_no = %update.demographic_no,
                doc_type = %update.doc_type,
                "Document tagged"
            );
        } else {
            tracing::error!(document_id = %ctx.task.document_id, "Directory refused tagging update");
        }
        ctx.task.submitted = accepted;
        Ok(StepOutcome::Flag(accepted))
    })
}

fn classifier(ctx: &WorkflowContext) -> CategoryClassifier<'_> {
    CategoryClassifier::new(
        ctx.prompter(),
        &ctx.settings.prompts,
        &ctx.settings.categories,
        &ctx.settings.defaults,
    )
}

/// Tagging update for a task, or `None` when the patient or category is
/// missing.
///
/// Providers are flagged in order: the patient's MRP, providers resolved
/// during the run, the tag-to-all provider, then the category's default
/// tagger. Duplicates and empty ids are dropped.
pub fn build_update(
    task: &DocumentTask,
    settings: &RunSettings,
    observation_date: chrono::NaiveDate,
) -> Option<DocumentUpdate> {
    let patient = task.patient.as_ref()?;
    let category = task.category.as_deref()?;
    if patient.demographic_no.is_empty()
        || patient.formatted_name.is_empty()
        || patient.formatted_dob.is_empty()
    {
        return None;
    }

    let default_id = settings.defaults.provider_tagging_id();
    let mut providers: Vec<String> = Vec::new();
    let mut flag = |id: &str| {
        let id = id.trim();
        if !id.is_empty() && !providers.iter().any(|p| p == id) {
            providers.push(id.to_string());
        }
    };

    if let Some(mrp) = patient.mrp() {
        flag(mrp);
    }
    for id in task.provider_ids.iter().filter(|id| id.as_str() != default_id) {
        flag(id.as_str());
    }
    flag(default_id);
    if let Some(tagger) = find_category(&settings.categories, category).and_then(|c| c.default_tagger.as_deref()) {
        flag(tagger);
    }

    let description = task
        .description
        .clone()
        .unwrap_or_else(|| category.to_string());

    Some(DocumentUpdate {
        document_id: task.document_id.clone(),
        queue: task.queue,
        doc_type: category.to_lowercase(),
        document_description: description,
        observation_date,
        demographic_no: patient.demographic_no.clone(),
        demographic_keyword: patient.keyword(),
        flag_providers: providers,
        mrp_no: patient.mrp().map(str::to_string),
        needs_review: task.needs_review,
    })
}
