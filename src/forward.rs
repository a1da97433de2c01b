//! Forward index: per-document ascending term lists in CSR form.
//!
//! The transpose of an inverted index. Built once before bisection and
//! read-only afterwards, so it can be shared freely across worker threads.
//! Term lists are validated at construction: strictly ascending, every id
//! below `term_count`.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::codec;
use crate::error::{Error, Result};
use crate::{DocId, TermId};

/// Forward index in CSR format: document `d`'s terms are
/// `terms[offsets[d]..offsets[d + 1]]`.
///
/// Documents are addressed by position; the original identifier travels in
/// `ids` so the output permutation can be read off after reordering.
pub struct ForwardIndex {
    ids: Vec<DocId>,
    offsets: Vec<usize>,
    terms: Vec<TermId>,
    term_count: u32,
}

/// Borrowed view of one document entry.
#[derive(Debug, Clone, Copy)]
pub struct Document<'a> {
    pub id: DocId,
    pub terms: &'a [TermId],
}

impl ForwardIndex {
    /// Number of documents.
    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Dictionary size: exclusive upper bound on term ids.
    #[inline]
    pub fn term_count(&self) -> u32 {
        self.term_count
    }

    /// Terms of the document at `position`, strictly ascending.
    #[inline]
    pub fn terms(&self, position: usize) -> &[TermId] {
        &self.terms[self.offsets[position]..self.offsets[position + 1]]
    }

    /// Original identifier of the document at `position`.
    #[inline]
    pub fn doc_id(&self, position: usize) -> DocId {
        self.ids[position]
    }

    /// Iterate over document entries in position order.
    pub fn documents(&self) -> impl Iterator<Item = Document<'_>> + '_ {
        (0..self.len()).map(move |position| Document {
            id: self.ids[position],
            terms: self.terms(position),
        })
    }

    /// Build from explicit `(id, terms)` entries, preserving their order.
    ///
    /// Ids must be dense in `[0, D)`; term lists strictly ascending with
    /// every id below `term_count`.
    pub fn from_documents(
        documents: impl IntoIterator<Item = (DocId, Vec<TermId>)>,
        term_count: u32,
    ) -> Result<Self> {
        let entries: Vec<(DocId, Vec<TermId>)> = documents.into_iter().collect();

        let mut seen = vec![false; entries.len()];
        let mut offsets = Vec::with_capacity(entries.len() + 1);
        let mut ids = Vec::with_capacity(entries.len());
        let mut terms = Vec::new();
        offsets.push(0);
        for (id, doc_terms) in &entries {
            match seen.get_mut(*id as usize) {
                Some(slot) if !*slot => *slot = true,
                _ => {
                    return Err(Error::InvalidInput(format!(
                        "document ids must be dense and unique, got {id}"
                    )));
                }
            }
            validate_terms(doc_terms, term_count)?;
            ids.push(*id);
            terms.extend_from_slice(doc_terms);
            offsets.push(terms.len());
        }

        Ok(Self {
            ids,
            offsets,
            terms,
            term_count,
        })
    }

    /// Build by sweeping an in-memory inverted index term-by-term.
    ///
    /// `lists[t]` is term `t`'s ascending posting list; `term_count` is
    /// `lists.len()`. Lists with fewer than `min_len` postings contribute
    /// nothing (short lists gain little from reordering) but still occupy
    /// their term id. Documents whose term list comes out empty are placed
    /// after all non-empty documents, both groups in id order.
    pub fn from_postings(num_docs: u32, lists: &[Vec<DocId>], min_len: usize) -> Result<Self> {
        let num_docs = num_docs as usize;

        // Phase 1: count terms per document.
        let mut counts = vec![0usize; num_docs];
        for list in lists {
            let mut prev = None;
            for &doc in list {
                if doc as usize >= num_docs {
                    return Err(Error::InvalidInput(format!(
                        "posting {doc} out of range for {num_docs} documents"
                    )));
                }
                if prev.is_some_and(|p| p >= doc) {
                    return Err(Error::InvalidInput(
                        "posting list must be strictly ascending".into(),
                    ));
                }
                prev = Some(doc);
            }
            if list.len() >= min_len {
                for &doc in list {
                    counts[doc as usize] += 1;
                }
            }
        }

        // Phase 2: CSR offsets.
        let mut offsets = Vec::with_capacity(num_docs + 1);
        offsets.push(0usize);
        for &c in &counts {
            offsets.push(offsets.last().unwrap() + c);
        }

        // Phase 3: fill. Terms are visited in ascending id order, so each
        // document's list comes out ascending.
        let mut terms = vec![0u32; *offsets.last().unwrap()];
        counts.fill(0);
        for (term, list) in lists.iter().enumerate() {
            if list.len() < min_len {
                continue;
            }
            for &doc in list {
                let doc = doc as usize;
                terms[offsets[doc] + counts[doc]] = term as u32;
                counts[doc] += 1;
            }
        }

        let index = Self {
            ids: (0..num_docs as u32).collect(),
            offsets,
            terms,
            term_count: lists.len() as u32,
        };
        Ok(index.with_empty_documents_last())
    }

    /// Parse the binary-collection `.docs` layout: little-endian `u32`
    /// length-prefixed sequences, the first being a singleton holding the
    /// document count, each subsequent one a term's ascending posting list.
    pub fn from_binary_collection(bytes: &[u8], min_len: usize) -> Result<Self> {
        let mut rest = bytes;
        let header = take_sequence(&mut rest)?;
        if header.len() != 1 {
            return Err(Error::InvalidInput(
                "first sequence must only contain the number of documents".into(),
            ));
        }
        let num_docs = header[0];

        let mut lists = Vec::new();
        while !rest.is_empty() {
            lists.push(take_sequence(&mut rest)?);
        }
        Self::from_postings(num_docs, &lists, min_len)
    }

    /// Reorder rows so documents with empty term lists follow all non-empty
    /// ones, each group keeping id order.
    fn with_empty_documents_last(self) -> Self {
        if !self.documents().any(|d| d.terms.is_empty()) {
            return self;
        }

        let positions = (0..self.len())
            .filter(|&p| !self.terms(p).is_empty())
            .chain((0..self.len()).filter(|&p| self.terms(p).is_empty()));

        let mut ids = Vec::with_capacity(self.len());
        let mut offsets = Vec::with_capacity(self.len() + 1);
        let mut terms = Vec::with_capacity(self.terms.len());
        offsets.push(0);
        for position in positions {
            ids.push(self.ids[position]);
            terms.extend_from_slice(self.terms(position));
            offsets.push(terms.len());
        }

        Self {
            ids,
            offsets,
            terms,
            term_count: self.term_count,
        }
    }

    /// Serialize: header, then per document its id, term count, and the
    /// d-gapped variable-byte term list.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(self.len() as u32)?;
        writer.write_u32::<LittleEndian>(self.term_count)?;

        let mut buf = Vec::new();
        for doc in self.documents() {
            buf.clear();
            codec::encode_gaps(doc.terms, &mut buf);
            writer.write_u32::<LittleEndian>(doc.id)?;
            writer.write_u32::<LittleEndian>(doc.terms.len() as u32)?;
            writer.write_u32::<LittleEndian>(buf.len() as u32)?;
            writer.write_all(&buf)?;
        }
        Ok(())
    }

    /// Deserialize an index written by [`write`](Self::write), re-running
    /// full validation.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let num_docs = reader.read_u32::<LittleEndian>()? as usize;
        let term_count = reader.read_u32::<LittleEndian>()?;

        let mut seen = vec![false; num_docs];
        let mut ids = Vec::with_capacity(num_docs);
        let mut offsets = Vec::with_capacity(num_docs + 1);
        let mut terms = Vec::new();
        offsets.push(0);

        let mut encoded = Vec::new();
        for _ in 0..num_docs {
            let id = reader.read_u32::<LittleEndian>()?;
            let len = reader.read_u32::<LittleEndian>()? as usize;
            let encoded_len = reader.read_u32::<LittleEndian>()? as usize;

            encoded.resize(encoded_len, 0);
            reader.read_exact(&mut encoded)?;

            match seen.get_mut(id as usize) {
                Some(slot) if !*slot => *slot = true,
                _ => {
                    return Err(Error::InvalidInput(format!(
                        "document ids must be dense and unique, got {id}"
                    )));
                }
            }

            let start = terms.len();
            codec::decode_gaps(&encoded, len, &mut terms)?;
            validate_terms(&terms[start..], term_count)?;
            ids.push(id);
            offsets.push(terms.len());
        }

        Ok(Self {
            ids,
            offsets,
            terms,
            term_count,
        })
    }
}

fn validate_terms(terms: &[TermId], term_count: u32) -> Result<()> {
    let mut prev = None;
    for &t in terms {
        if t >= term_count {
            return Err(Error::InvalidInput(format!(
                "term {t} out of range for dictionary of {term_count}"
            )));
        }
        if prev.is_some_and(|p| p >= t) {
            return Err(Error::InvalidInput(
                "term list must be strictly ascending".into(),
            ));
        }
        prev = Some(t);
    }
    Ok(())
}

fn take_u32(bytes: &mut &[u8]) -> Result<u32> {
    if bytes.len() < 4 {
        return Err(Error::InvalidInput("truncated binary collection".into()));
    }
    let (head, tail) = bytes.split_at(4);
    *bytes = tail;
    Ok(u32::from_le_bytes(head.try_into().unwrap()))
}

fn take_sequence(bytes: &mut &[u8]) -> Result<Vec<u32>> {
    let len = take_u32(bytes)? as usize;
    let mut sequence = Vec::with_capacity(len);
    for _ in 0..len {
        sequence.push(take_u32(bytes)?);
    }
    Ok(sequence)
}
