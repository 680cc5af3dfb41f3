//! Scan batch reading.
//!
//! The upstream scanner leaves `scans`, `tags_update` and
//! `workvirtuals_update` rows in the source database. Each scan batch is
//! read as one ordered stream of rows delivered in before/after pairs
//! (updateorder 0 then 1). The stream concatenates three selects: plain
//! album rows from tags_update, work/virtual rows joined to the live tags
//! table, and work/virtual deletes joined to tags_update for tracks that
//! no longer exist in tags.

use anyhow::{Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, Row};
use std::path::Path;

use crate::progress::{log_error, warn};

/// Table names to read from: the real source tables, or their in-memory
/// replica when source and target are the same file.
#[derive(Debug, Clone)]
pub struct SourceTables {
    pub tags_update: &'static str,
    pub workvirtuals_update: &'static str,
    pub tags: &'static str,
}

/// Open the source database. When it is the same file as the target, the
/// three source tables are replicated into an attached in-memory database
/// so target writes cannot race the read cursor.
pub fn open_source(tagdb: &Path, trackdb: &Path) -> Result<(Connection, SourceTables)> {
    let conn = Connection::open(tagdb)
        .with_context(|| format!("opening source database {}", tagdb.display()))?;
    // relative and absolute spellings of the same file must both hit the
    // replica path
    let same_file = match (tagdb.canonicalize(), trackdb.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => tagdb == trackdb,
    };
    if same_file {
        conn.execute_batch(
            "ATTACH '' AS tempdb;
             CREATE TABLE tempdb.tags_update AS SELECT * FROM tags_update;
             CREATE TABLE tempdb.tags AS SELECT * FROM tags;
             CREATE TABLE tempdb.workvirtuals_update AS SELECT * FROM workvirtuals_update;",
        )
        .context("replicating source tables into tempdb")?;
        Ok((
            conn,
            SourceTables {
                tags_update: "tempdb.tags_update",
                workvirtuals_update: "tempdb.workvirtuals_update",
                tags: "tempdb.tags",
            },
        ))
    } else {
        Ok((
            conn,
            SourceTables {
                tags_update: "tags_update",
                workvirtuals_update: "workvirtuals_update",
                tags: "tags",
            },
        ))
    }
}

/// Pending scans, in id order as stored.
pub fn read_scans(conn: &Connection) -> Result<Vec<(i64, String)>> {
    let mut stmt = conn
        .prepare("SELECT id, scanpath FROM scans")
        .context("querying scan details")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Remove one processed scan and its update rows from the source.
pub fn cleanup_scan(conn: &Connection, scan_id: i64, scan_path: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM scans WHERE id=? AND scanpath=?",
        rusqlite::params![scan_id, scan_path],
    )?;
    conn.execute("DELETE FROM tags_update WHERE scannumber=?", [scan_id])?;
    conn.execute(
        "DELETE FROM workvirtuals_update WHERE scannumber=?",
        [scan_id],
    )?;
    Ok(())
}

// ============================================================================
// Event Rows
// ============================================================================

/// One raw update row in wire order. Every field is carried as text the
/// way the scanner wrote it; normalization happens downstream.
#[derive(Debug, Clone, Default)]
pub struct RawEvent {
    pub id: String,
    pub id2: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
    pub tracknumber: String,
    pub year: String,
    pub albumartist: String,
    pub composer: String,
    pub codec: String,
    pub length: String,
    pub size: String,
    pub created: String,
    pub path: String,
    pub filename: String,
    pub discnumber: String,
    pub comment: String,
    pub folderart: String,
    pub trackart: String,
    pub bitrate: String,
    pub samplerate: String,
    pub bitspersample: String,
    pub channels: String,
    pub mime: String,
    pub lastmodified: String,
    pub scannumber: i64,
    pub folderartid: String,
    pub trackartid: String,
    pub inserted: String,
    pub lastscanned: String,
    pub titlesort: String,
    pub albumsort: String,
    pub artistsort: String,
    pub albumartistsort: String,
    pub composersort: String,
    pub updateorder: i64,
    pub updatetype: String,
    pub originalalbum: String,
    pub albumtypestring: String,
    pub coverart: String,
    pub coverartid: String,
}

impl RawEvent {
    pub fn filespec(&self) -> String {
        if self.path.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.path.trim_end_matches('/'), self.filename)
        }
    }
}

/// A before/after image pair for one track event.
#[derive(Debug, Clone)]
pub struct EventPair {
    pub old: RawEvent,
    pub new: RawEvent,
}

/// Read a column as text regardless of its stored type.
fn get_string(row: &Row, idx: usize) -> String {
    match row.get_ref(idx) {
        Ok(ValueRef::Null) => String::new(),
        Ok(ValueRef::Integer(i)) => i.to_string(),
        Ok(ValueRef::Real(f)) => f.to_string(),
        Ok(ValueRef::Text(t)) => String::from_utf8_lossy(t).into_owned(),
        Ok(ValueRef::Blob(_)) => String::new(),
        Err(_) => String::new(),
    }
}

fn get_i64(row: &Row, idx: usize) -> i64 {
    match row.get_ref(idx) {
        Ok(ValueRef::Integer(i)) => i,
        Ok(ValueRef::Real(f)) => f as i64,
        Ok(ValueRef::Text(t)) => String::from_utf8_lossy(t).trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn event_from_row(row: &Row) -> RawEvent {
    RawEvent {
        id: get_string(row, 0),
        id2: get_string(row, 1),
        title: get_string(row, 2),
        artist: get_string(row, 3),
        album: get_string(row, 4),
        genre: get_string(row, 5),
        tracknumber: get_string(row, 6),
        year: get_string(row, 7),
        albumartist: get_string(row, 8),
        composer: get_string(row, 9),
        codec: get_string(row, 10),
        length: get_string(row, 11),
        size: get_string(row, 12),
        created: get_string(row, 13),
        path: get_string(row, 14),
        filename: get_string(row, 15),
        discnumber: get_string(row, 16),
        comment: get_string(row, 17),
        folderart: get_string(row, 18),
        trackart: get_string(row, 19),
        bitrate: get_string(row, 20),
        samplerate: get_string(row, 21),
        bitspersample: get_string(row, 22),
        channels: get_string(row, 23),
        mime: get_string(row, 24),
        lastmodified: get_string(row, 25),
        scannumber: get_i64(row, 26),
        folderartid: get_string(row, 27),
        trackartid: get_string(row, 28),
        inserted: get_string(row, 29),
        lastscanned: get_string(row, 30),
        titlesort: get_string(row, 31),
        albumsort: get_string(row, 32),
        artistsort: get_string(row, 33),
        albumartistsort: get_string(row, 34),
        composersort: get_string(row, 35),
        updateorder: get_i64(row, 36),
        updatetype: get_string(row, 37),
        originalalbum: get_string(row, 38),
        albumtypestring: get_string(row, 39),
        coverart: get_string(row, 40),
        coverartid: get_string(row, 41),
    }
}

/// Build the three-part event statement for one scan.
fn event_statement(tables: &SourceTables, regenerate: bool) -> String {
    // regeneration replays everything, so ordering must keep both images of
    // a pair adjacent and group repeating works/virtuals deterministically
    let (orderby_tu, orderby_wv) = if regenerate {
        (
            "id, updateorder",
            "w.wvfile, w.plfile, w.id, w.title, w.type, w.occurs, w.updateorder",
        )
    } else {
        ("updatetype, rowid", "w.updatetype, w.rowid")
    };

    const WV_COLUMNS: &str = "t.id, t.id2,
                t.title, w.artist, w.title,
                w.genre, w.track, w.year,
                w.albumartist, w.composer, t.codec,
                t.length, t.size,
                w.created, t.path, t.filename,
                w.discnumber, t.comment,
                t.folderart, t.trackart,
                t.bitrate, t.samplerate,
                t.bitspersample, t.channels, t.mime,
                w.lastmodified,
                w.scannumber, t.folderartid, t.trackartid,
                w.inserted, w.lastscanned,
                w.titlesort, w.albumsort, w.artistsort,
                w.albumartistsort, w.composersort,
                w.updateorder, w.updatetype,
                t.album, w.type,
                w.cover, w.coverartid";

    format!(
        "SELECT * FROM (
            SELECT id, id2, title, artist, album, genre, tracknumber, year,
                   albumartist, composer, codec, length, size, created, path,
                   filename, discnumber, comment, folderart, trackart,
                   bitrate, samplerate, bitspersample, channels, mime,
                   lastmodified, scannumber, folderartid, trackartid,
                   inserted, lastscanned, titlesort, albumsort, artistsort,
                   albumartistsort, composersort, updateorder, updatetype,
                   '', 'album', '', -1
            FROM {tu} WHERE scannumber=? ORDER BY {orderby_tu}
         ) first

         UNION ALL

         SELECT * FROM (
            SELECT {wv_columns}
            FROM {wv} w INNER JOIN {t} t ON t.id = w.id
            WHERE w.scannumber=?
            ORDER BY {orderby_wv}
         ) second

         UNION ALL

         SELECT * FROM (
            SELECT {wv_columns}
            FROM {wv} w INNER JOIN {tu} t
              ON t.id = w.id AND t.updatetype = w.updatetype AND t.updateorder = w.updateorder
            WHERE w.scannumber=?
            AND w.updatetype='D'
            ORDER BY {orderby_wv}
         ) third",
        tu = tables.tags_update,
        wv = tables.workvirtuals_update,
        t = tables.tags,
        wv_columns = WV_COLUMNS,
        orderby_tu = orderby_tu,
        orderby_wv = orderby_wv,
    )
}

/// Read the events of one scan batch and pair them up.
///
/// Rows are consumed two at a time; a pair whose ids don't match or whose
/// update orders aren't 0 then 1 is logged and dropped.
pub fn read_pairs(
    conn: &Connection,
    tables: &SourceTables,
    scan_id: i64,
    regenerate: bool,
) -> Result<Vec<EventPair>> {
    let statement = event_statement(tables, regenerate);
    let mut stmt = conn
        .prepare(&statement)
        .context("preparing scan event statement")?;
    let mut rows = stmt.query(rusqlite::params![scan_id, scan_id, scan_id])?;

    let mut pairs = Vec::new();
    loop {
        let row0 = match rows.next()? {
            Some(row) => event_from_row(row),
            None => break,
        };
        let row1 = match rows.next()? {
            Some(row) => event_from_row(row),
            None => {
                warn(&format!(
                    "odd row count in scan {}: unpaired event for id {}",
                    scan_id, row0.id
                ));
                break;
            }
        };

        // check that we do indeed have a pair
        if row0.id != row1.id {
            log_error("tag/workvirtual update record pair does not match on ID");
            continue;
        }
        if row0.updateorder != 0 || row1.updateorder != 1 {
            log_error("tag/workvirtual update record pair update order wrong");
            continue;
        }

        pairs.push(EventPair {
            old: row0,
            new: row1,
        });
    }
    Ok(pairs)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{create_source_schema, insert_tag_pair, TagRow};

    #[test]
    fn test_read_scans() {
        let conn = Connection::open_in_memory().unwrap();
        create_source_schema(&conn);
        conn.execute("INSERT INTO scans VALUES (1, '/music')", [])
            .unwrap();
        conn.execute("INSERT INTO scans VALUES (2, '/more')", [])
            .unwrap();
        let scans = read_scans(&conn).unwrap();
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[0], (1, "/music".to_string()));
    }

    #[test]
    fn test_read_pairs_album_stream() {
        let conn = Connection::open_in_memory().unwrap();
        create_source_schema(&conn);
        insert_tag_pair(
            &conn,
            1,
            "I",
            &TagRow::default(),
            &TagRow {
                id: "T1",
                title: "Song",
                artist: "Band",
                album: "Disc",
                tracknumber: "1",
                ..TagRow::default()
            },
        );
        let tables = SourceTables {
            tags_update: "tags_update",
            workvirtuals_update: "workvirtuals_update",
            tags: "tags",
        };
        let pairs = read_pairs(&conn, &tables, 1, false).unwrap();
        assert_eq!(pairs.len(), 1);
        let pair = &pairs[0];
        assert_eq!(pair.new.title, "Song");
        assert_eq!(pair.new.albumtypestring, "album");
        assert_eq!(pair.new.updatetype, "I");
        assert_eq!(pair.old.updateorder, 0);
        assert_eq!(pair.new.updateorder, 1);
    }

    #[test]
    fn test_mismatched_pair_is_skipped() {
        let conn = Connection::open_in_memory().unwrap();
        create_source_schema(&conn);
        // two rows with different ids, both claiming updateorder 0/1
        insert_tag_pair(
            &conn,
            1,
            "I",
            &TagRow::default(),
            &TagRow {
                id: "T1",
                title: "A",
                artist: "X",
                album: "D",
                ..TagRow::default()
            },
        );
        conn.execute("UPDATE tags_update SET id='T2' WHERE updateorder=1", [])
            .unwrap();
        let tables = SourceTables {
            tags_update: "tags_update",
            workvirtuals_update: "workvirtuals_update",
            tags: "tags",
        };
        let pairs = read_pairs(&conn, &tables, 1, false).unwrap();
        assert!(pairs.is_empty());
    }
}
