use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cpm::build::manifest::PacketManifest;
use cpm::build::{run_build, BuildOptions};
use cpm::chunker::Chunk;
use cpm::compiler::{compile, CompileInput};
use cpm::config::{load_workspace_config, WorkspaceLayout};
use cpm::diff::{check_drift_gate, diff as diff_packets, DiffChunk};
use cpm::embed::EmbedderClient;
use cpm::error::{downcast_chain, CpmError};
use cpm::policy::{evaluate_local, evaluate_remote, combine, load_policy, Decision, OperationKind, PolicyContext};
use cpm::rerank::{NoopReranker, Reranker, RerankCandidate, TokenDiversityReranker};
use cpm::retrieve::{Bm25Index, FlatIpIndex, RetrievalMode, Retriever};
use cpm::source::cas::SourceCache;
use cpm::source::{PacketReference, SourceRegistry};
use cpm::replay::{compute_compiler_output_hash, compute_result_hash, read_replay_log, verify_replay, ReplayLog};
use cpm::trust::{SignatureCheck, ProvenanceCheck, SbomCheck, TrustReport, TrustRequirements};
use std::path::PathBuf;

/// Runs the two-stage policy check shared by `install` and `query`: local rules first, then an
/// optional hub round-trip when `enforce_remote_policy` is set (§4.6). On a strict-mode deny,
/// trust-specific violations (signature/sbom/provenance/score) surface as `TrustViolation` (exit
/// 4, per §4.5's "Policy interaction"); everything else (source allowlist, token budget, a
/// remote hub deny) surfaces as `PolicyDeny` (exit 3).
fn gate(
    policy: &cpm::policy::Policy,
    op: OperationKind,
    ctx: &PolicyContext,
    hub_url: Option<&str>,
    enforce_remote: bool,
    hub_timeout_secs: u64,
) -> Result<Decision> {
    let local = evaluate_local(policy, op, ctx);
    let remote = match hub_url {
        Some(url) => Some(evaluate_remote(url, policy, ctx, enforce_remote, hub_timeout_secs)?),
        None => None,
    };
    let decision = combine(local, remote);

    if let Decision::Deny { reasons } = &decision {
        if let Some(trust) = &ctx.trust {
            let reqs = TrustRequirements {
                require_signature: policy.require.signature,
                require_sbom: policy.require.sbom,
                require_provenance: policy.require.provenance,
                min_trust_score: policy.min_trust_score,
            };
            if let Err(err) = cpm::trust::check_requirements(trust, &reqs) {
                return Err(err.into());
            }
        }
        return Err(CpmError::PolicyDeny { rule: reasons.join("; ") }.into());
    }

    if let Decision::Warn { reasons } = &decision {
        eprintln!("warning: policy warn: {}", reasons.join("; "));
    }

    Ok(decision)
}

/// Builds a `TrustReport` from the lockfile's recorded `source.verification` (signature/sbom/
/// provenance booleans + score), the form trust survives in once a packet is installed locally.
fn trust_from_lock(verification: &cpm::build::lockfile::SourceVerification) -> TrustReport {
    TrustReport {
        signature: SignatureCheck { present: verification.signature, valid: verification.signature, issuer: None },
        sbom: SbomCheck { present: verification.sbom, valid: verification.sbom, format: None },
        provenance: ProvenanceCheck { present: verification.provenance, valid: verification.provenance, slsa_level: None },
        score: verification.trust_score,
        reasons: Vec::new(),
    }
}

#[derive(Debug, Parser)]
#[command(name = "cpm")]
#[command(version)]
#[command(about = "Context supply-chain engine: build, publish, resolve, verify, and query RAG context packets")]
struct Cli {
    /// Workspace root (cache/, state/, packages/, policy.yml). Defaults to the current directory.
    #[arg(long, global = true, default_value = ".")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Dense,
    Sparse,
    Hybrid,
}

impl From<ModeArg> for RetrievalMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Dense => RetrievalMode::Dense,
            ModeArg::Sparse => RetrievalMode::Sparse,
            ModeArg::Hybrid => RetrievalMode::Hybrid,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RerankArg {
    Noop,
    Mmr,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build a packet from a source directory (§4.2).
    Build {
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long)]
        version: String,
        #[arg(long, default_value_t = 5_000_000)]
        max_file_bytes: u64,
    },
    /// Resolve a source URI to a packet reference without fetching (§4.4).
    Resolve {
        uri: String,
    },
    /// Fetch and install a packet referenced by URI into the workspace (§4.4).
    Install {
        uri: String,
    },
    /// Query a built packet's context (§4.6-§4.8).
    Query {
        #[arg(long)]
        packet: String,
        #[arg(long)]
        version: String,
        #[arg(long)]
        text: String,
        #[arg(long, default_value_t = 8)]
        k: usize,
        #[arg(long, value_enum, default_value_t = ModeArgDefault::value())]
        mode: ModeArg,
        #[arg(long, value_enum, default_value_t = RerankArgDefault::value())]
        rerank: RerankArg,
        #[arg(long)]
        token_budget: Option<usize>,
        /// Time-travel: resolve against the lock snapshot as of this RFC 3339 timestamp (§4.9).
        #[arg(long)]
        as_of: Option<String>,
        /// A lock/artifact mismatch aborts instead of warning (§7).
        #[arg(long)]
        frozen_lockfile: bool,
        /// On a non-frozen lock mismatch, rewrite `cpm-lock.json`'s output hashes to match the
        /// artifacts currently on disk instead of just warning (§7).
        #[arg(long)]
        update_lock: bool,
    },
    /// Publish a built packet as an OCI layout: payload tree + manifest + lockfile + optional
    /// signature/SBOM/provenance referrers (§4.5 "Publish layout").
    Publish {
        packet_dir: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
        /// Hex-encoded Ed25519 signing key seed (32 bytes); omit to publish unsigned.
        #[arg(long)]
        signing_key: Option<String>,
        #[arg(long)]
        key_id: Option<String>,
        #[arg(long)]
        issuer: Option<String>,
        /// Path to a JSON document matching `{format, artifact_digests}`.
        #[arg(long)]
        sbom: Option<PathBuf>,
        /// Path to a JSON document matching `{predicate_type, slsa_level}`.
        #[arg(long)]
        provenance: Option<PathBuf>,
    },
    /// Verify a packet's lockfile against its on-disk artifacts (§4.2 invariant e).
    Verify {
        packet_dir: PathBuf,
    },
    /// Diff two packet directories and report added/removed/changed chunks plus drift (§4.10).
    Diff {
        old_packet_dir: PathBuf,
        new_packet_dir: PathBuf,
        #[arg(long)]
        max_drift: Option<f64>,
    },
    /// Re-run a stored replay log and verify it reproduces the same result set (§4.9).
    Replay {
        replay_log: PathBuf,
        #[arg(long)]
        packet_dir: PathBuf,
    },
}

// clap requires a concrete default; both enums default to their first listed variant.
struct ModeArgDefault;
impl ModeArgDefault {
    fn value() -> ModeArg {
        ModeArg::Hybrid
    }
}
struct RerankArgDefault;
impl RerankArgDefault {
    fn value() -> RerankArg {
        RerankArg::Noop
    }
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn load_docs(packet_dir: &PathBuf) -> Result<Vec<Chunk>> {
    let text = std::fs::read_to_string(packet_dir.join("docs.jsonl")).context("reading docs.jsonl")?;
    text.lines().map(|line| serde_json::from_str(line).context("parsing docs.jsonl line")).collect()
}

fn load_manifest(packet_dir: &PathBuf) -> Result<PacketManifest> {
    let text = std::fs::read_to_string(packet_dir.join("manifest.json")).context("reading manifest.json")?;
    serde_json::from_str(&text).context("parsing manifest.json")
}

/// Result of running the retrieve/rerank/compile pipeline once against a packet on disk. Shared
/// between a live `query` and `replay`, which must reproduce the exact same steps (§4.9).
struct QueryExecution {
    result_ids: Vec<String>,
    compiler_output_hash: String,
    total_tokens: usize,
    json: serde_json::Value,
    /// Left empty by `execute_query` itself; the caller fills it in once a policy decision
    /// exists (replay has no policy gate of its own to re-evaluate).
    policy_decision: String,
}

fn execute_query(packet_dir: &PathBuf, config: &cpm::config::WorkspaceConfig, query_text: &str, mode: RetrievalMode, rerank: RerankArg, k: usize, budget: usize) -> Result<QueryExecution> {
    let manifest = load_manifest(packet_dir)?;
    let docs = load_docs(packet_dir)?;
    let vectors_bytes = std::fs::read(packet_dir.join("vectors.f16.bin")).context("reading vectors.f16.bin")?;
    let vectors = cpm::retrieve::vectors::decode(&vectors_bytes, manifest.embedding.dim)?;
    if vectors.len() != docs.len() {
        bail!("vectors.f16.bin row count {} does not match docs.jsonl count {}", vectors.len(), docs.len());
    }

    let ids: Vec<String> = docs.iter().map(|c| c.id.clone()).collect();
    let dense = FlatIpIndex::build(ids.clone(), vectors.clone());
    let sparse = if config.build.hybrid_retrieval {
        let texts: Vec<(String, String)> = docs.iter().map(|c| (c.id.clone(), c.text.clone())).collect();
        Some(Bm25Index::build(&texts))
    } else {
        None
    };
    let retriever = Retriever::new(dense, sparse);

    let client = EmbedderClient::from_config(&config.embedding);
    let query_vector = client.embed_all(&[query_text.to_string()])?.into_iter().next().ok_or_else(|| anyhow!("embedder returned no vector for query"))?;

    let hits = retriever.search(mode, query_text, &query_vector, k.max(1) * 4);
    if hits.is_empty() {
        return Err(CpmError::QueryEmpty.into());
    }

    let by_id: std::collections::HashMap<&str, &Chunk> = docs.iter().map(|c| (c.id.as_str(), c)).collect();
    let vector_by_id: std::collections::HashMap<&str, &Vec<f32>> = ids.iter().map(|s| s.as_str()).zip(vectors.iter()).collect();

    let candidates: Vec<RerankCandidate> = hits
        .iter()
        .filter_map(|hit| by_id.get(hit.chunk_id.as_str()).map(|c| RerankCandidate { chunk_id: c.id.clone(), text: c.text.clone(), score: hit.score }))
        .collect();

    let reranked = match rerank {
        RerankArg::Noop => NoopReranker.rerank(query_text, candidates, k),
        RerankArg::Mmr => TokenDiversityReranker::default().rerank(query_text, candidates, k),
    };

    let compile_inputs: Vec<CompileInput> = reranked
        .iter()
        .filter_map(|rc| {
            let chunk = by_id.get(rc.chunk_id.as_str())?;
            let vector = vector_by_id.get(rc.chunk_id.as_str())?;
            Some(CompileInput { chunk_id: chunk.id.clone(), path: chunk.metadata.path.clone(), text: chunk.text.clone(), vector: (*vector).clone(), score: rc.score })
        })
        .collect();

    let compiled = compile(compile_inputs, budget);
    let result_ids: Vec<String> = reranked.iter().map(|c| c.chunk_id.clone()).collect();
    let rendered = format!("{}\n{}\n{}\n{}", compiled.outline, compiled.core_snippets, compiled.glossary, compiled.risks);

    let json = serde_json::json!({
        "citations": compiled.citations.iter().map(|c| serde_json::json!({"chunk_id": c.chunk_id, "path": c.path})).collect::<Vec<_>>(),
        "outline": compiled.outline,
        "core_snippets": compiled.core_snippets,
        "glossary": compiled.glossary,
        "risks": compiled.risks,
        "total_tokens": compiled.total_tokens,
        "dropped": compiled.dropped,
    });

    Ok(QueryExecution {
        compiler_output_hash: compute_compiler_output_hash(&rendered),
        total_tokens: compiled.total_tokens,
        result_ids,
        json,
        policy_decision: String::new(),
    })
}

fn run_query(cli: &Cli, packet: &str, version: &str, text: &str, k: usize, mode: ModeArg, rerank: RerankArg, token_budget: Option<usize>, as_of: Option<String>, frozen_lockfile: bool, update_lock: bool) -> Result<()> {
    let layout = WorkspaceLayout::new(&cli.workspace);
    let replay_dir = layout.state_replay_dir();
    let timestamp = now_iso().replace(':', "-");
    let mode_str = format!("{:?}", mode).to_lowercase();
    let reranker_str = match rerank {
        RerankArg::Noop => "noop".to_string(),
        RerankArg::Mmr => "mmr".to_string(),
    };

    // Filled in as each piece of context becomes known, so a log can still be written with
    // whatever was learned before a later step failed (§4.11: replay logs are written on both
    // `Emitted` and `Failed`).
    let packet_digest: std::cell::RefCell<Option<String>> = std::cell::RefCell::new(None);
    let source_uri_cell: std::cell::RefCell<Option<String>> = std::cell::RefCell::new(None);
    let model_cell: std::cell::RefCell<Option<String>> = std::cell::RefCell::new(None);
    let budget_cell: std::cell::RefCell<Option<usize>> = std::cell::RefCell::new(None);

    let outcome = (|| -> Result<QueryExecution> {
        let config = load_workspace_config(&layout);

        let (packet_dir, mut lock) = if let Some(ts) = &as_of {
            let locks_dir = layout.state_locks_dir(packet);
            let (_resolved_ts, lock) = cpm::build::lockfile::resolve_as_of(&locks_dir, ts)?.ok_or_else(|| anyhow!("no lock snapshot for {packet} as of {ts}"))?;
            (layout.package_dir(packet, version), Some(lock))
        } else {
            let dir = layout.package_dir(packet, version);
            let lock = std::fs::read_to_string(dir.join("cpm-lock.json")).ok().and_then(|text| serde_json::from_str::<cpm::build::lockfile::Lockfile>(&text).ok());
            (dir, lock)
        };

        // §7: a live (non-time-travel) lock that no longer matches its artifacts is a
        // `LockMismatch`. `--frozen-lockfile` aborts; otherwise this warns and, with
        // `--update-lock`, rewrites the lock's output hashes to match what's on disk.
        if as_of.is_none() {
            if let Some(current_lock) = lock.as_mut() {
                if let Err(err) = current_lock.verify_outputs(&packet_dir) {
                    if frozen_lockfile {
                        return Err(err.into());
                    }
                    eprintln!("warning: {err}");
                    if update_lock {
                        current_lock.rewrite_outputs(&packet_dir).context("rewriting cpm-lock.json outputs")?;
                        let lock_path = packet_dir.join("cpm-lock.json");
                        cpm::build::atomic::write_atomic(&lock_path, serde_json::to_string_pretty(current_lock)?.as_bytes())
                            .context("writing updated cpm-lock.json")?;
                    }
                }
            }
        }

        let policy = load_policy(&layout.policy_path(), None);
        let source_uri = lock.as_ref().and_then(|l| l.source.as_ref()).map(|s| s.uri.clone()).unwrap_or_else(|| format!("dir://{}", packet_dir.display()));
        let trust = lock.as_ref().and_then(|l| l.source.as_ref()).map(|s| trust_from_lock(&s.verification));

        *packet_digest.borrow_mut() = lock.as_ref().and_then(|l| l.source.as_ref()).map(|s| s.digest.clone());
        *source_uri_cell.borrow_mut() = Some(source_uri.clone());

        let manifest = load_manifest(&packet_dir)?;
        *model_cell.borrow_mut() = Some(manifest.embedding.model.clone());

        let budget = token_budget.or(policy.max_tokens).unwrap_or(4000);
        *budget_cell.borrow_mut() = Some(budget);

        let execution = execute_query(&packet_dir, &config, text, mode.into(), rerank, k, budget)?;

        let ctx = PolicyContext {
            source_uri: source_uri.clone(),
            trust: trust.clone(),
            tokens: Some(execution.total_tokens),
            declared_model: Some(manifest.embedding.model.clone()),
        };
        let decision = gate(
            &policy,
            OperationKind::Query,
            &ctx,
            config.network.hub_url.as_deref(),
            config.network.enforce_remote_policy,
            config.network.hub_timeout_secs,
        )?;

        Ok(QueryExecution { policy_decision: format!("{:?}", decision), ..execution })
    })();

    let log = match &outcome {
        Ok(execution) => ReplayLog {
            query_text: text.to_string(),
            mode: mode_str,
            k,
            as_of: as_of.clone(),
            packet_digest: packet_digest.into_inner(),
            source_uri: source_uri_cell.into_inner(),
            model: model_cell.into_inner(),
            token_budget: budget_cell.into_inner(),
            reranker: Some(reranker_str),
            result_chunk_ids: execution.result_ids.clone(),
            result_hash: compute_result_hash(&execution.result_ids),
            compiler_output_hash: Some(execution.compiler_output_hash.clone()),
            policy_decision: execution.policy_decision.clone(),
            timestamp,
        },
        Err(err) => ReplayLog {
            query_text: text.to_string(),
            mode: mode_str,
            k,
            as_of: as_of.clone(),
            packet_digest: packet_digest.into_inner(),
            source_uri: source_uri_cell.into_inner(),
            model: model_cell.into_inner(),
            token_budget: budget_cell.into_inner(),
            reranker: Some(reranker_str),
            result_chunk_ids: Vec::new(),
            result_hash: compute_result_hash(&[]),
            compiler_output_hash: None,
            policy_decision: format!("Failed: {err:#}"),
            timestamp,
        },
    };

    match outcome {
        Ok(execution) => {
            cpm::replay::write_replay_log(&replay_dir, &log)?;
            println!("{}", serde_json::to_string_pretty(&execution.json)?);
            Ok(())
        }
        Err(err) => {
            let _ = cpm::replay::write_replay_log(&replay_dir, &log);
            Err(err)
        }
    }
}

/// Re-runs the query pipeline exactly as `query` recorded it, resolving the packet from CAS by
/// the logged digest rather than trusting whatever is sitting at `packet_dir_hint` (§4.9: replay
/// "re-runs the query with the logged parameters against the logged packet digest (from CAS)").
/// `packet_dir_hint` is only consulted as the `dir://` fallback for logs written before
/// `source_uri` existed.
fn run_replay(cli: &Cli, replay_log_path: &PathBuf, packet_dir_hint: &PathBuf) -> Result<()> {
    let layout = WorkspaceLayout::new(&cli.workspace);
    let config = load_workspace_config(&layout);
    let policy = load_policy(&layout.policy_path(), None);

    let log = read_replay_log(replay_log_path)?;
    let digest = log
        .packet_digest
        .clone()
        .ok_or_else(|| anyhow!("replay log has no recorded packet digest; cannot resolve the packet from CAS"))?;
    let uri = log.source_uri.clone().unwrap_or_else(|| format!("dir://{}", packet_dir_hint.display()));

    let registry = SourceRegistry::with_builtins_and_keys(None, config.network.hub_url.clone(), policy.issuer_keys.clone(), policy.trust_weights);
    let source = registry.resolve_source(&uri).ok_or_else(|| anyhow!("no source handles uri: {uri}"))?;

    let current = source.resolve(&uri).context("re-resolving the logged source uri")?;
    if current.digest != digest {
        bail!("packet digest changed since the replay log was recorded: expected {digest}, found {}", current.digest);
    }

    let cache = SourceCache::new(layout.cache_objects_dir(), 5 * 1024 * 1024 * 1024);
    let reference = PacketReference { uri: uri.clone(), digest: digest.clone(), refs: current.refs, trust: current.trust };
    let local = source.fetch(&reference, &cache).context("fetching the logged packet from CAS")?;

    let mode = match log.mode.as_str() {
        "dense" => RetrievalMode::Dense,
        "sparse" => RetrievalMode::Sparse,
        _ => RetrievalMode::Hybrid,
    };
    let rerank = match log.reranker.as_deref() {
        Some("mmr") => RerankArg::Mmr,
        _ => RerankArg::Noop,
    };
    let budget = log.token_budget.unwrap_or(4000);

    let execution = execute_query(&local.path, &config, &log.query_text, mode, rerank, log.k, budget)?;

    verify_replay(&log, &execution.result_ids, Some(execution.compiler_output_hash.as_str()))?;

    println!(
        "replay {} reproduced {} results (result_hash and compiler_output_hash both match)",
        replay_log_path.display(),
        execution.result_ids.len()
    );
    Ok(())
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.clone_for_dispatch() {
        DispatchCommand::Build { source, name, version, max_file_bytes } => {
            let layout = WorkspaceLayout::new(&cli.workspace);
            let config = load_workspace_config(&layout);
            let outcome = run_build(BuildOptions {
                source_dir: source,
                packet_id: name,
                version,
                layout,
                config,
                max_file_bytes,
                created_at: now_iso(),
            })?;
            println!(
                "built {} ({} docs, {} vectors, {} reused, {} embedded, {} removed) -> {}",
                outcome.manifest.packet_id,
                outcome.manifest.counts.docs,
                outcome.manifest.counts.vectors,
                outcome.manifest.incremental.reused,
                outcome.manifest.incremental.embedded,
                outcome.manifest.incremental.removed,
                outcome.packet_dir.display()
            );
        }
        DispatchCommand::Resolve { uri } => {
            let layout = WorkspaceLayout::new(&cli.workspace);
            let config = load_workspace_config(&layout);
            let policy = load_policy(&layout.policy_path(), None);
            let registry = SourceRegistry::with_builtins_and_keys(None, config.network.hub_url.clone(), policy.issuer_keys.clone(), policy.trust_weights);
            let source = registry.resolve_source(&uri).ok_or_else(|| anyhow!("no source handles uri: {uri}"))?;
            let reference = source.resolve(&uri)?;
            println!("{}", serde_json::to_string_pretty(&reference)?);
        }
        DispatchCommand::Install { uri } => {
            let layout = WorkspaceLayout::new(&cli.workspace);
            let config = load_workspace_config(&layout);
            let policy = load_policy(&layout.policy_path(), None);
            let registry = SourceRegistry::with_builtins_and_keys(None, config.network.hub_url.clone(), policy.issuer_keys.clone(), policy.trust_weights);
            let source = registry.resolve_source(&uri).ok_or_else(|| anyhow!("no source handles uri: {uri}"))?;
            let reference = source.resolve(&uri)?;

            let ctx = PolicyContext {
                source_uri: uri.clone(),
                trust: reference.trust.clone(),
                tokens: None,
                declared_model: None,
            };
            gate(
                &policy,
                OperationKind::Install,
                &ctx,
                config.network.hub_url.as_deref(),
                config.network.enforce_remote_policy,
                config.network.hub_timeout_secs,
            )?;

            let cache = SourceCache::new(layout.cache_objects_dir(), 5 * 1024 * 1024 * 1024);
            let local = source.fetch(&reference, &cache)?;
            println!("installed {}@{} -> {}", local.manifest.packet_id, local.manifest.version, local.path.display());
        }
        DispatchCommand::Query { packet, version, text, k, mode, rerank, token_budget, as_of, frozen_lockfile, update_lock } => {
            run_query(&cli, &packet, &version, &text, k, mode, rerank, token_budget, as_of, frozen_lockfile, update_lock)?;
        }
        DispatchCommand::Publish { packet_dir, out_dir, signing_key, key_id, issuer, sbom, provenance } => {
            let sbom = sbom
                .map(|p| -> Result<_> { Ok(serde_json::from_str(&std::fs::read_to_string(&p).with_context(|| format!("reading {}", p.display()))?)?) })
                .transpose()?;
            let provenance = provenance
                .map(|p| -> Result<_> { Ok(serde_json::from_str(&std::fs::read_to_string(&p).with_context(|| format!("reading {}", p.display()))?)?) })
                .transpose()?;
            let outcome = cpm::publish::run_publish(cpm::publish::PublishOptions {
                packet_dir,
                out_dir,
                signing_key_hex: signing_key,
                key_id,
                issuer,
                sbom,
                provenance,
            })?;
            println!("published {} -> {} ({} referrers)", outcome.digest, outcome.out_dir.display(), outcome.referrers.len());
        }
        DispatchCommand::Verify { packet_dir } => {
            let lock_text = std::fs::read_to_string(packet_dir.join("cpm-lock.json")).context("reading cpm-lock.json")?;
            let lock: cpm::build::lockfile::Lockfile = serde_json::from_str(&lock_text)?;
            lock.verify_outputs(&packet_dir)?;
            println!("ok: {} matches its lockfile", packet_dir.display());
        }
        DispatchCommand::Diff { old_packet_dir, new_packet_dir, max_drift } => {
            let old_docs = load_docs(&old_packet_dir)?;
            let new_docs = load_docs(&new_packet_dir)?;
            let old_manifest = load_manifest(&old_packet_dir)?;
            let new_manifest = load_manifest(&new_packet_dir)?;
            let old_vectors = cpm::retrieve::vectors::decode(&std::fs::read(old_packet_dir.join("vectors.f16.bin"))?, old_manifest.embedding.dim)?;
            let new_vectors = cpm::retrieve::vectors::decode(&std::fs::read(new_packet_dir.join("vectors.f16.bin"))?, new_manifest.embedding.dim)?;

            let to_diff_chunks = |docs: &[Chunk], vectors: &[Vec<f32>]| -> Vec<DiffChunk> {
                docs.iter().zip(vectors.iter()).map(|(c, v)| DiffChunk { chunk_id: c.id.clone(), path: c.metadata.path.clone(), content_hash: c.content_hash.clone(), vector: v.clone() }).collect()
            };
            let report = diff_packets(&to_diff_chunks(&old_docs, &old_vectors), &to_diff_chunks(&new_docs, &new_vectors));

            println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                "drift_score": report.drift_score,
                "added": report.entries.iter().filter(|e| matches!(e.kind, cpm::diff::ChangeKind::Added)).count(),
                "removed": report.entries.iter().filter(|e| matches!(e.kind, cpm::diff::ChangeKind::Removed)).count(),
                "changed": report.entries.iter().filter(|e| matches!(e.kind, cpm::diff::ChangeKind::Changed)).count(),
            }))?);

            if let Some(max) = max_drift {
                check_drift_gate(&report, max)?;
            }
        }
        DispatchCommand::Replay { replay_log, packet_dir } => {
            run_replay(&cli, &replay_log, &packet_dir)?;
        }
    }

    Ok(())
}

// `clap::Subcommand`-derived enums aren't `Clone` by default when they hold `PathBuf`/`String`
// fields we want to move out of in the `match` above; this thin re-shape avoids borrowing `cli`
// across the whole dispatch while keeping `Command`'s derive untouched.
enum DispatchCommand {
    Build { source: PathBuf, name: String, version: String, max_file_bytes: u64 },
    Resolve { uri: String },
    Install { uri: String },
    Query { packet: String, version: String, text: String, k: usize, mode: ModeArg, rerank: RerankArg, token_budget: Option<usize>, as_of: Option<String>, frozen_lockfile: bool, update_lock: bool },
    Publish { packet_dir: PathBuf, out_dir: PathBuf, signing_key: Option<String>, key_id: Option<String>, issuer: Option<String>, sbom: Option<PathBuf>, provenance: Option<PathBuf> },
    Verify { packet_dir: PathBuf },
    Diff { old_packet_dir: PathBuf, new_packet_dir: PathBuf, max_drift: Option<f64> },
    Replay { replay_log: PathBuf, packet_dir: PathBuf },
}

impl Command {
    fn clone_for_dispatch(self) -> DispatchCommand {
        match self {
            Command::Build { source, name, version, max_file_bytes } => DispatchCommand::Build { source, name, version, max_file_bytes },
            Command::Resolve { uri } => DispatchCommand::Resolve { uri },
            Command::Install { uri } => DispatchCommand::Install { uri },
            Command::Query { packet, version, text, k, mode, rerank, token_budget, as_of, frozen_lockfile, update_lock } => {
                DispatchCommand::Query { packet, version, text, k, mode, rerank, token_budget, as_of, frozen_lockfile, update_lock }
            }
            Command::Publish { packet_dir, out_dir, signing_key, key_id, issuer, sbom, provenance } => {
                DispatchCommand::Publish { packet_dir, out_dir, signing_key, key_id, issuer, sbom, provenance }
            }
            Command::Verify { packet_dir } => DispatchCommand::Verify { packet_dir },
            Command::Diff { old_packet_dir, new_packet_dir, max_drift } => DispatchCommand::Diff { old_packet_dir, new_packet_dir, max_drift },
            Command::Replay { replay_log, packet_dir } => DispatchCommand::Replay { replay_log, packet_dir },
        }
    }
}

fn main() {
    if let Err(err) = run() {
        let code = downcast_chain(&err).map(CpmError::exit_code).unwrap_or(10);
        eprintln!("error: {err:#}");
        std::process::exit(code);
    }
}
