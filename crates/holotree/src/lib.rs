#![deny(missing_docs)]

//! Top-level orchestration: composes a blueprint from descriptor files,
//! resolves it against the catalog, builds on a miss, and materializes a
//! working space — the `materialize(descriptors, space_id)` flow the rest
//! of the workspace's crates exist to serve.
//!
//! This crate owns no CLI, no config-file parser, no HTTP client, and no
//! telemetry sender; [`HolotreeContext`] is built and injected by whatever
//! front end the caller provides, matching each sub-crate's own pattern of
//! taking its collaborators (`Locker`, `Library`, `BuildReporter`) by
//! reference rather than constructing them internally.

mod context;
mod error;

pub use context::HolotreeContext;
pub use error::HolotreeError;

use holotree_builder::BuildRequest;
use holotree_builder::BuildReporter;
use holotree_hash::Blueprint;
use holotree_journal::{JournalEvent, OutcomeCounts};
use holotree_library::Library;
use holotree_space::RestoreReport;
use std::path::PathBuf;
use std::time::SystemTime;

/// What a [`materialize`] call produced: a materialized live space, or —
/// under `stage_only`/`live_only` — the template directory a build just
/// populated, with no separate live space created at all.
#[derive(Debug, Clone)]
pub enum MaterializeOutcome {
    /// A live space was restored; the usual result.
    Space(RestoreReport),
    /// No live space was created. Either `stage_only` was set (the caller
    /// only wanted the catalog/template to exist), or `live_only` was set
    /// and this call just built the blueprint, so the fresh template
    /// itself stands in for a separate space copy.
    Template {
        /// The blueprint the template was built for.
        blueprint: Blueprint,
        /// The template directory's path.
        path: PathBuf,
    },
}

/// Composes `descriptor_files` into a single blueprint, resolves it
/// against the catalog for `ctx`'s `(platform, arch)`, builds it on a miss
/// (unless `ctx.no_build`), and materializes `space_name` from the result.
///
/// `descriptor_files` are merged in order via [`holotree_descriptor::Descriptor::merge`]
/// — later files win on `name` and contribute their requirements and
/// post-install commands, matching the right-wins merge the descriptor
/// crate implements.
pub async fn materialize(
    ctx: &HolotreeContext,
    library: &Library,
    reporter: &dyn BuildReporter,
    descriptor_files: &[(String, Vec<u8>)],
    space_name: &str,
) -> Result<MaterializeOutcome, HolotreeError> {
    let (descriptor, blueprint) = holotree_descriptor::compose_final_blueprint(descriptor_files)?;
    let locker = ctx.locker(space_name);

    let mut catalog = holotree_catalog::lookup(&ctx.hololib_root, blueprint, &ctx.platform, &ctx.arch)?;
    let mut just_built = false;

    if catalog.is_none() {
        if ctx.no_build {
            return Err(HolotreeError::BuildDisabled(blueprint));
        }

        let conda_yaml = holotree_descriptor::canonical_yaml(&descriptor.conda_projection());
        let pip_requirements = descriptor.pip_projection();
        let request = BuildRequest {
            descriptor_yaml: &conda_yaml,
            pip_requirements: &pip_requirements,
            post_install: &descriptor.post_install,
            blueprint,
            platform: ctx.platform.clone(),
            arch: ctx.arch.clone(),
        };

        let builder = ctx.builder();
        builder.build(&locker, library, &request, reporter).await?;
        just_built = true;

        catalog = holotree_catalog::lookup(&ctx.hololib_root, blueprint, &ctx.platform, &ctx.arch)?;
    }

    let catalog = catalog.expect("a build that returns Ok always publishes its own catalog entry");
    holotree_catalog::bump_used(&ctx.hololib_root, blueprint, &ctx.platform, &ctx.arch, SystemTime::now())?;

    if ctx.stage_only {
        tracing::debug!(blueprint = %blueprint, "stage-only: catalog and template are ready, skipping space materialization");
        return Ok(MaterializeOutcome::Template {
            blueprint,
            path: ctx.template_dir(blueprint),
        });
    }

    if ctx.live_only && just_built {
        tracing::debug!(blueprint = %blueprint, "live-only: serving the freshly built template directly instead of cloning a separate space");
        return Ok(MaterializeOutcome::Template {
            blueprint,
            path: ctx.template_dir(blueprint),
        });
    }

    let controller = ctx.controller_identity();
    let materializer = ctx.materializer();
    let report = materializer
        .restore(&locker, library, &catalog, &controller, space_name)
        .await?;
    Ok(MaterializeOutcome::Space(report))
}

/// Reads every event ever recorded against `ctx`'s stats journal, for a
/// diagnostics front end to aggregate. `holotree_journal::aggregate`/
/// `aggregate_window` turn the result into per-outcome counts over the
/// whole history or a recent time window (e.g. "hit rate over the last 12
/// days").
pub fn stats(ctx: &HolotreeContext) -> Result<Vec<JournalEvent>, HolotreeError> {
    Ok(holotree_journal::read_all(&ctx.journal_root)?)
}

/// Convenience wrapper: [`stats`] followed by `holotree_journal::aggregate`.
pub fn stats_summary(ctx: &HolotreeContext) -> Result<OutcomeCounts, HolotreeError> {
    Ok(holotree_journal::aggregate(&stats(ctx)?))
}
