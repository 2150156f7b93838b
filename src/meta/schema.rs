//! SQLite schema definition

/// SQL schema for the knowledge repository
pub const SCHEMA_SQL: &str = r#"
-- Knowledge bases: one retrieval namespace per (owner_type, owner_id, kb_type)
CREATE TABLE IF NOT EXISTS knowledge_bases (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_type TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    kb_type TEXT NOT NULL,
    name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'enabled',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(owner_type, owner_id, kb_type)
);

-- Knowledge sources: one ingestible origin inside a knowledge base
CREATE TABLE IF NOT EXISTS knowledge_sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kb_id INTEGER NOT NULL REFERENCES knowledge_bases(id),
    tenant_user_id TEXT NOT NULL,
    source_type TEXT NOT NULL,
    source_key TEXT NOT NULL,
    acl_json TEXT NOT NULL DEFAULT '{}',
    version INTEGER NOT NULL DEFAULT 1,
    status TEXT NOT NULL DEFAULT 'enabled',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(kb_id, source_type, source_key, tenant_user_id)
);

-- Chunks: content-addressed text fragments
CREATE TABLE IF NOT EXISTS knowledge_chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kb_id INTEGER NOT NULL REFERENCES knowledge_bases(id),
    source_id INTEGER NOT NULL REFERENCES knowledge_sources(id),
    chunk_key TEXT NOT NULL UNIQUE,
    chunk_index INTEGER NOT NULL,
    content TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL DEFAULT 'enabled',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Vector records: exactly one per chunk, source of truth for queryability
CREATE TABLE IF NOT EXISTS vector_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chunk_id INTEGER NOT NULL UNIQUE REFERENCES knowledge_chunks(id),
    vector_store TEXT NOT NULL,
    collection TEXT NOT NULL,
    vector_id TEXT NOT NULL UNIQUE,
    embedding_provider TEXT NOT NULL,
    embedding_model TEXT NOT NULL,
    dim INTEGER NOT NULL,
    embed_status TEXT NOT NULL DEFAULT 'pending',
    error_msg TEXT,
    embedded_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Backfill jobs: aggregate progress of a bulk historical run
CREATE TABLE IF NOT EXISTS backfill_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_user_id TEXT NOT NULL,
    status TEXT NOT NULL,
    since TEXT,
    until TEXT,
    page_size INTEGER NOT NULL DEFAULT 200,
    max_sessions INTEGER NOT NULL DEFAULT 0,
    max_pages_per_session INTEGER NOT NULL DEFAULT 0,
    total_events INTEGER NOT NULL DEFAULT 0,
    published_events INTEGER NOT NULL DEFAULT 0,
    succeeded_events INTEGER NOT NULL DEFAULT 0,
    failed_events INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    finished_at TEXT
);

-- Ingest events: the outbox
CREATE TABLE IF NOT EXISTS ingest_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type TEXT NOT NULL,
    tenant_user_id TEXT NOT NULL,
    backfill_job_id INTEGER REFERENCES backfill_jobs(id),
    source_type TEXT NOT NULL,
    source_key TEXT NOT NULL,
    payload_json TEXT NOT NULL DEFAULT '{}',
    dedup_key TEXT NOT NULL UNIQUE,
    publish_status TEXT NOT NULL DEFAULT 'pending',
    topic TEXT,
    msg_partition INTEGER,
    msg_offset INTEGER,
    published_at TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    retry_count INTEGER NOT NULL DEFAULT 0,
    next_retry_at TEXT,
    processing_started_at TEXT,
    claim_token TEXT,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_sources_kb ON knowledge_sources(kb_id);
CREATE INDEX IF NOT EXISTS idx_chunks_source ON knowledge_chunks(source_id);
CREATE INDEX IF NOT EXISTS idx_vectors_status ON vector_records(embed_status);
CREATE INDEX IF NOT EXISTS idx_events_publish ON ingest_events(publish_status, next_retry_at);
CREATE INDEX IF NOT EXISTS idx_events_status ON ingest_events(status, processing_started_at);
CREATE INDEX IF NOT EXISTS idx_events_job ON ingest_events(backfill_job_id);
"#;
