use std::{path::Path, sync::Mutex};

use tantivy::{
    DocAddress,
    Index,
    IndexReader,
    IndexWriter,
    TantivyDocument,
    Term,
    collector::TopDocs,
    doc,
    query::{QueryParser, TermQuery},
    schema::*,
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
    },
};
use tracing::{debug, info};

use crate::{
    chunk::{Chunk, ChunkId},
    error::{Error, Result},
};

/// Memory budget handed to each tantivy writer.
const WRITER_MEMORY_BUDGET: usize = 15_000_000;

/// Field names used in the schema.
pub mod fields {
    pub const CHUNK_ID: &str = "chunk_id";
    pub const DOCUMENT_ID: &str = "document_id";
    pub const PAGE_NUMBER: &str = "page_number";
    pub const CHUNK_INDEX: &str = "chunk_index";
    pub const TEXT: &str = "text";
}

/// BM25 inverted index over chunk text.
///
/// Each chunk is one tantivy document keyed by its chunk id, with the
/// citation fields stored alongside so hits can be turned back into chunks
/// without a second lookup.
pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    fields: SchemaFields,
    write_lock: Mutex<()>,
}

/// Resolved field handles for the schema.
#[derive(Clone, Copy)]
struct SchemaFields {
    chunk_id: Field,
    document_id: Field,
    page_number: Field,
    chunk_index: Field,
    text: Field,
}

/// A ranked hit from [`LexicalIndex::search`].
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub document_id: u64,
    pub page_number: u64,
    pub chunk_index: u64,
}

fn build_schema() -> (Schema, SchemaFields) {
    let mut builder = Schema::builder();

    let chunk_id =
        builder.add_u64_field(fields::CHUNK_ID, INDEXED | STORED | FAST);
    let document_id =
        builder.add_u64_field(fields::DOCUMENT_ID, INDEXED | STORED);
    let page_number = builder.add_u64_field(fields::PAGE_NUMBER, STORED);
    let chunk_index = builder.add_u64_field(fields::CHUNK_INDEX, STORED);

    let text_opts = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("en_stem")
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
        .set_stored();
    let text = builder.add_text_field(fields::TEXT, text_opts);

    let schema = builder.build();
    let fields = SchemaFields {
        chunk_id,
        document_id,
        page_number,
        chunk_index,
        text,
    };

    (schema, fields)
}

fn register_tokenizers(index: &Index) {
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build();
    index.tokenizers().register("en_stem", en_stem);
}

fn resolve_fields(schema: &Schema) -> Result<SchemaFields> {
    let f = |name: &str| {
        schema.get_field(name).map_err(|_| {
            Error::IndexUnavailable(format!(
                "lexical index schema is missing field {name}"
            ))
        })
    };
    Ok(SchemaFields {
        chunk_id: f(fields::CHUNK_ID)?,
        document_id: f(fields::DOCUMENT_ID)?,
        page_number: f(fields::PAGE_NUMBER)?,
        chunk_index: f(fields::CHUNK_INDEX)?,
        text: f(fields::TEXT)?,
    })
}

fn open_mmap_dir(dir: &Path) -> Result<tantivy::directory::MmapDirectory> {
    tantivy::directory::MmapDirectory::open(dir).map_err(|e| {
        Error::Tantivy(tantivy::TantivyError::SystemError(e.to_string()))
    })
}

impl LexicalIndex {
    /// Open the index at `dir`, creating it (and the directory) if absent.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let mmap_dir = open_mmap_dir(dir)?;

        let exists = Index::exists(&mmap_dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?;
        let index = if exists {
            Index::open(mmap_dir)?
        } else {
            let (schema, _) = build_schema();
            Index::create(mmap_dir, schema, tantivy::IndexSettings::default())?
        };

        Self::from_index(index)
    }

    /// Create an in-memory index (for testing).
    pub fn open_in_ram() -> Result<Self> {
        let (schema, _) = build_schema();
        Self::from_index(Index::create_in_ram(schema))
    }

    fn from_index(index: Index) -> Result<Self> {
        register_tokenizers(&index);
        let fields = resolve_fields(&index.schema())?;
        let reader = index.reader()?;

        Ok(Self {
            index,
            reader,
            fields,
            write_lock: Mutex::new(()),
        })
    }

    fn with_writer<T>(
        &self,
        f: impl FnOnce(&mut IndexWriter) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.write_lock.lock().map_err(|_| {
            Error::IndexUnavailable("lexical writer lock poisoned".into())
        })?;
        let mut writer: IndexWriter = self.index.writer(WRITER_MEMORY_BUDGET)?;
        let out = f(&mut writer)?;
        writer.commit()?;
        self.reader.reload()?;
        Ok(out)
    }

    fn add_chunk(&self, writer: &IndexWriter, chunk: &Chunk) -> Result<()> {
        let f = self.fields;
        writer.delete_term(Term::from_field_u64(f.chunk_id, chunk.id));
        writer.add_document(doc!(
            f.chunk_id => chunk.id,
            f.document_id => chunk.document_id,
            f.page_number => chunk.page_number,
            f.chunk_index => chunk.chunk_index,
            f.text => chunk.text.as_str(),
        ))?;
        Ok(())
    }

    /// Insert or replace chunks, keyed by chunk id. Previously indexed
    /// chunks are kept.
    pub fn upsert(&self, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        self.with_writer(|writer| {
            for chunk in chunks {
                self.add_chunk(writer, chunk)?;
            }
            Ok(())
        })?;
        info!(count = chunks.len(), "lexical index updated");
        Ok(chunks.len())
    }

    /// Clear the index and rebuild it from `chunks`.
    pub fn rebuild_all(&self, chunks: &[Chunk]) -> Result<usize> {
        self.with_writer(|writer| {
            writer.delete_all_documents()?;
            for chunk in chunks {
                self.add_chunk(writer, chunk)?;
            }
            Ok(())
        })?;
        info!(count = chunks.len(), "lexical index rebuilt");
        Ok(chunks.len())
    }

    /// Delete chunks by id. Unknown ids are ignored.
    pub fn remove(&self, chunk_ids: &[ChunkId]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        self.with_writer(|writer| {
            for &chunk_id in chunk_ids {
                writer.delete_term(Term::from_field_u64(
                    self.fields.chunk_id,
                    chunk_id,
                ));
            }
            Ok(())
        })
    }

    /// Search chunk text with BM25 scoring, OR-ing the query terms.
    ///
    /// Returns at most `top_k` hits, best first; equal scores keep index
    /// order. A blank query returns no hits.
    pub fn search(
        &self,
        query_str: &str,
        top_k: usize,
    ) -> Result<Vec<LexicalHit>> {
        let query_str = query_str.trim();
        if query_str.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let f = self.fields;
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![f.text]);
        let (query, errors) = parser.parse_query_lenient(query_str);
        if !errors.is_empty() {
            debug!(?errors, "lenient query parse dropped clauses");
        }

        let mut top_docs: Vec<(f32, DocAddress)> =
            searcher.search(&query, &TopDocs::with_limit(top_k))?;
        top_docs.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            results.push(LexicalHit {
                chunk_id: extract_u64(&doc, f.chunk_id),
                score,
                document_id: extract_u64(&doc, f.document_id),
                page_number: extract_u64(&doc, f.page_number),
                chunk_index: extract_u64(&doc, f.chunk_index),
            });
        }

        Ok(results)
    }

    /// Reconstruct a stored chunk by id.
    pub fn get(&self, chunk_id: ChunkId) -> Result<Option<Chunk>> {
        let f = self.fields;
        let searcher = self.reader.searcher();
        let query = TermQuery::new(
            Term::from_field_u64(f.chunk_id, chunk_id),
            IndexRecordOption::Basic,
        );
        let top = searcher.search(&query, &TopDocs::with_limit(1))?;
        let Some((_, address)) = top.into_iter().next() else {
            return Ok(None);
        };
        let doc: TantivyDocument = searcher.doc(address)?;
        Ok(Some(self.to_chunk(&doc)))
    }

    /// All chunk ids currently in the index, ascending.
    #[cfg(test)]
    pub(crate) fn chunk_ids(&self) -> Result<Vec<ChunkId>> {
        let searcher = self.reader.searcher();
        let addresses = searcher.search(
            &tantivy::query::AllQuery,
            &tantivy::collector::DocSetCollector,
        )?;
        let mut ids = Vec::with_capacity(addresses.len());
        for address in addresses {
            let doc: TantivyDocument = searcher.doc(address)?;
            ids.push(extract_u64(&doc, self.fields.chunk_id));
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Number of live (non-deleted) chunks.
    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_chunk(&self, doc: &TantivyDocument) -> Chunk {
        let f = self.fields;
        Chunk {
            id: extract_u64(doc, f.chunk_id),
            document_id: extract_u64(doc, f.document_id),
            page_number: extract_u64(doc, f.page_number),
            chunk_index: extract_u64(doc, f.chunk_index),
            text: extract_text(doc, f.text),
        }
    }
}

impl std::fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalIndex").finish_non_exhaustive()
    }
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn extract_u64(doc: &TantivyDocument, field: Field) -> u64 {
    doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0)
}
