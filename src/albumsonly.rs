//! Albumsonly roll-up.
//!
//! After a batch's per-track work, albums are rolled up across the artist
//! and albumartist dimensions for the "all albums" browse axis: one row
//! per (album, duplicate, albumtype) with the tracknumber lists of every
//! matching albums row merged. Album titles on the separate-albums
//! exception list instead keep one row per (artist, albumartist), flagged
//! with separated=1.

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, ToSql};

use crate::config::Config;
use crate::models::{sort_tracknumber_tokens, SyncStats, UpdateType};
use crate::progress::{log_action, log_error};

/// One album observed during the batch, queued for roll-up.
/// Entries are deduplicated; each album is processed once per batch.
#[derive(Debug, Clone, PartialEq)]
pub struct AlbumsonlyEntry {
    pub album: String,
    pub duplicate: i64,
    pub albumtype: i64,
    pub albumsort: String,
    /// The parsed album names (or the single generated work/virtual name)
    /// feeding the ArtistAlbumsonly/AlbumartistAlbumsonly lookups.
    pub albumlist: Vec<String>,
    pub updatetype: UpdateType,
    pub artistlist: String,
    pub albumartistlist: String,
}

/// A full albums row, carried dynamically typed the way it is stored.
struct AlbumRow {
    artistlist: String,
    year: Value,
    albumartistlist: String,
    duplicate: i64,
    cover: Value,
    artid: Value,
    inserted: Value,
    composerlist: Value,
    tracknumbers: String,
    created: Value,
    lastmodified: Value,
    albumtype: i64,
    albumsort: String,
}

fn exec(conn: &Connection, stats: &mut SyncStats, label: &str, sql: &str, params: &[&dyn ToSql]) -> usize {
    let result = conn
        .prepare_cached(sql)
        .and_then(|mut stmt| stmt.execute(params));
    match result {
        Ok(n) => n,
        Err(e) => {
            log_error(&format!("Error {}: {}", label, e));
            stats.row_errors += 1;
            0
        }
    }
}

fn row_to_album(row: &rusqlite::Row) -> rusqlite::Result<AlbumRow> {
    Ok(AlbumRow {
        artistlist: row.get(2)?,
        year: row.get(3)?,
        albumartistlist: row.get(4)?,
        duplicate: row.get(5)?,
        cover: row.get(6)?,
        artid: row.get(7)?,
        inserted: row.get(8)?,
        composerlist: row.get(9)?,
        tracknumbers: row.get(10)?,
        created: row.get(11)?,
        lastmodified: row.get(12)?,
        albumtype: row.get(13)?,
        albumsort: row.get(16)?,
    })
}

/// Run the roll-up for every album the batch touched.
pub fn process(conn: &Connection, cfg: &Config, entries: &[AlbumsonlyEntry], stats: &mut SyncStats) {
    for entry in entries {
        // check for albumsonly exceptions
        let keep_albums_separate = entry
            .albumlist
            .iter()
            .any(|a| cfg.separate_album_list.contains(a));
        let separate_value: i64 = if keep_albums_separate { 1 } else { 0 };

        if entry.updatetype == UpdateType::Delete {
            delete_albumsonly(conn, stats, entry, keep_albums_separate);
        } else {
            upsert_albumsonly(conn, stats, entry, keep_albums_separate, separate_value);
        }
    }
}

fn delete_albumsonly(
    conn: &Connection,
    stats: &mut SyncStats,
    entry: &AlbumsonlyEntry,
    keep_albums_separate: bool,
) {
    if keep_albums_separate {
        log_action("DELETE ALBUMONLY", &entry.album);
        let n = exec(
            conn,
            stats,
            "updating albumonly details",
            "DELETE FROM albumsonly
             WHERE albumlist=? AND artistlist=? AND albumartistlist=? AND duplicate=? AND albumtype=?",
            &[
                &entry.album,
                &entry.artistlist,
                &entry.albumartistlist,
                &entry.duplicate,
                &entry.albumtype,
            ],
        );
        stats.albumsonly_deleted += n;

        for lalbum in &entry.albumlist {
            log_action("DELETE ArtistAlbumsonly", lalbum);
            exec(
                conn,
                stats,
                "updating albumonly details",
                "DELETE FROM ArtistAlbumsonly WHERE album=? AND artist=? AND duplicate=? AND albumtype=?",
                &[lalbum, &entry.artistlist, &entry.duplicate, &entry.albumtype],
            );
            log_action("DELETE AlbumartistAlbumsonly", lalbum);
            exec(
                conn,
                stats,
                "updating albumonly details",
                "DELETE FROM AlbumartistAlbumsonly WHERE album=? AND albumartist=? AND duplicate=? AND albumtype=?",
                &[
                    lalbum,
                    &entry.albumartistlist,
                    &entry.duplicate,
                    &entry.albumtype,
                ],
            );
        }
    } else {
        log_action("DELETE ALBUMONLY", &entry.album);
        let n = exec(
            conn,
            stats,
            "updating albumonly details",
            "DELETE FROM albumsonly WHERE albumlist=? AND duplicate=? AND albumtype=?",
            &[&entry.album, &entry.duplicate, &entry.albumtype],
        );
        stats.albumsonly_deleted += n;

        for lalbum in &entry.albumlist {
            log_action("DELETE ArtistAlbumsonly", lalbum);
            exec(
                conn,
                stats,
                "updating albumonly details",
                "DELETE FROM ArtistAlbumsonly WHERE album=? AND duplicate=? AND albumtype=?",
                &[lalbum, &entry.duplicate, &entry.albumtype],
            );
            log_action("DELETE AlbumartistAlbumsonly", lalbum);
            exec(
                conn,
                stats,
                "updating albumonly details",
                "DELETE FROM AlbumartistAlbumsonly WHERE album=? AND duplicate=? AND albumtype=?",
                &[lalbum, &entry.duplicate, &entry.albumtype],
            );
        }
    }
}

fn upsert_albumsonly(
    conn: &Connection,
    stats: &mut SyncStats,
    entry: &AlbumsonlyEntry,
    keep_albums_separate: bool,
    separate_value: i64,
) {
    // gather the albums rows this roll-up covers
    let album = if keep_albums_separate {
        let found = conn
            .query_row(
                "SELECT * FROM albums
                 WHERE albumlist=? AND artistlist=? AND albumartistlist=? AND duplicate=? AND albumtype=?
                 ORDER BY tracknumbers",
                rusqlite::params![
                    entry.album,
                    entry.artistlist,
                    entry.albumartistlist,
                    entry.duplicate,
                    entry.albumtype
                ],
                row_to_album,
            )
            .optional();
        match found {
            Ok(Some(album)) => Some(album),
            Ok(None) => None,
            Err(e) => {
                log_error(&format!("Error updating albumonly details: {}", e));
                stats.row_errors += 1;
                return;
            }
        }
    } else {
        // merge every matching artist variant: union the tracknumber
        // lists, adopt the other fields from the row with the smallest
        // tracknumbers string
        let result = conn
            .prepare_cached(
                "SELECT * FROM albums WHERE albumlist=? AND duplicate=? AND albumtype=?
                 ORDER BY tracknumbers",
            )
            .and_then(|mut stmt| {
                let rows = stmt.query_map(
                    rusqlite::params![entry.album, entry.duplicate, entry.albumtype],
                    row_to_album,
                )?;
                rows.collect::<rusqlite::Result<Vec<AlbumRow>>>()
            });
        let rows = match result {
            Ok(rows) => rows,
            Err(e) => {
                log_error(&format!("Error updating albumonly details: {}", e));
                stats.row_errors += 1;
                return;
            }
        };
        let mut all_tracknumbers: Vec<String> = Vec::new();
        let mut lowest: Option<AlbumRow> = None;
        for row in rows {
            all_tracknumbers.extend(row.tracknumbers.split(',').map(|t| t.to_string()));
            let lower = match &lowest {
                None => true,
                Some(best) => row.tracknumbers < best.tracknumbers,
            };
            if lower {
                lowest = Some(row);
            }
        }
        lowest.map(|mut album| {
            sort_tracknumber_tokens(&mut all_tracknumbers);
            album.tracknumbers = all_tracknumbers.join(",");
            album
        })
    };

    let album = match album {
        Some(album) => album,
        None => {
            // every contributing albums row is gone; nothing to roll up
            return;
        }
    };

    // check if the albumsonly row exists
    let existing: rusqlite::Result<Option<i64>> = if keep_albums_separate {
        conn.query_row(
            "SELECT id FROM albumsonly
             WHERE albumlist=? AND artistlist=? AND albumartistlist=? AND duplicate=? AND albumtype=?",
            rusqlite::params![
                entry.album,
                entry.artistlist,
                entry.albumartistlist,
                entry.duplicate,
                entry.albumtype
            ],
            |row| row.get(0),
        )
        .optional()
    } else {
        conn.query_row(
            "SELECT id FROM albumsonly WHERE albumlist=? AND duplicate=? AND albumtype=?",
            rusqlite::params![entry.album, entry.duplicate, entry.albumtype],
            |row| row.get(0),
        )
        .optional()
    };

    let album_id = match existing {
        Ok(Some(id)) => {
            log_action("UPDATE ALBUMSONLY", &entry.album);
            exec(
                conn,
                stats,
                "updating albumonly details",
                "UPDATE albumsonly SET
                    albumlist=?, artistlist=?, year=?, albumartistlist=?, duplicate=?,
                    cover=?, artid=?, inserted=?, composerlist=?, tracknumbers=?,
                    created=?, lastmodified=?, albumtype=?, albumsort=?, separated=?
                 WHERE id=?",
                &[
                    &entry.album,
                    &album.artistlist,
                    &album.year,
                    &album.albumartistlist,
                    &album.duplicate,
                    &album.cover,
                    &album.artid,
                    &album.inserted,
                    &album.composerlist,
                    &album.tracknumbers,
                    &album.created,
                    &album.lastmodified,
                    &album.albumtype,
                    &album.albumsort,
                    &separate_value,
                    &id,
                ],
            );
            stats.albumsonly_upserted += 1;
            id
        }
        Ok(None) => {
            log_action("INSERT ALBUMSONLY", &entry.album);
            exec(
                conn,
                stats,
                "updating albumonly details",
                "INSERT INTO albumsonly VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
                &[
                    &Value::Null,
                    &entry.album,
                    &album.artistlist,
                    &album.year,
                    &album.albumartistlist,
                    &album.duplicate,
                    &album.cover,
                    &album.artid,
                    &album.inserted,
                    &album.composerlist,
                    &album.tracknumbers,
                    &album.created,
                    &album.lastmodified,
                    &album.albumtype,
                    &"",
                    &"",
                    &album.albumsort,
                    &separate_value,
                ],
            );
            stats.albumsonly_upserted += 1;
            conn.last_insert_rowid()
        }
        Err(e) => {
            log_error(&format!("Error updating albumonly details: {}", e));
            stats.row_errors += 1;
            return;
        }
    };

    // process albumsonly lookups
    for lalbum in &entry.albumlist {
        if keep_albums_separate {
            let exists = conn
                .prepare_cached(
                    "SELECT 1 FROM ArtistAlbumsonly
                     WHERE album_id=? AND album=? AND artist=? AND duplicate=? AND albumtype=? AND albumsort=?",
                )
                .and_then(|mut stmt| {
                    stmt.exists(rusqlite::params![
                        album_id,
                        lalbum,
                        entry.artistlist,
                        entry.duplicate,
                        entry.albumtype,
                        entry.albumsort
                    ])
                })
                .unwrap_or(true);
            if !exists {
                log_action("INSERT ArtistAlbumsonly", lalbum);
                exec(
                    conn,
                    stats,
                    "updating albumonly details",
                    "INSERT INTO ArtistAlbumsonly VALUES (?,?,?,?,?,?,?,?)",
                    &[
                        &album_id,
                        lalbum,
                        &album.artistlist,
                        &entry.duplicate,
                        &entry.albumtype,
                        &entry.albumsort,
                        &"",
                        &"",
                    ],
                );
            }
            let exists = conn
                .prepare_cached(
                    "SELECT 1 FROM AlbumartistAlbumsonly
                     WHERE album_id=? AND album=? AND albumartist=? AND duplicate=? AND albumtype=? AND albumsort=?",
                )
                .and_then(|mut stmt| {
                    stmt.exists(rusqlite::params![
                        album_id,
                        lalbum,
                        entry.albumartistlist,
                        entry.duplicate,
                        entry.albumtype,
                        entry.albumsort
                    ])
                })
                .unwrap_or(true);
            if !exists {
                log_action("INSERT AlbumartistAlbumsonly", lalbum);
                exec(
                    conn,
                    stats,
                    "updating albumonly details",
                    "INSERT INTO AlbumartistAlbumsonly VALUES (?,?,?,?,?,?,?,?)",
                    &[
                        &album_id,
                        lalbum,
                        &album.albumartistlist,
                        &entry.duplicate,
                        &entry.albumtype,
                        &entry.albumsort,
                        &"",
                        &"",
                    ],
                );
            }
        } else {
            let exists = conn
                .prepare_cached(
                    "SELECT 1 FROM ArtistAlbumsonly
                     WHERE album_id=? AND album=? AND duplicate=? AND albumtype=? AND albumsort=?",
                )
                .and_then(|mut stmt| {
                    stmt.exists(rusqlite::params![
                        album_id,
                        lalbum,
                        entry.duplicate,
                        entry.albumtype,
                        entry.albumsort
                    ])
                })
                .unwrap_or(true);
            if !exists {
                log_action("INSERT ArtistAlbumsonly", lalbum);
                exec(
                    conn,
                    stats,
                    "updating albumonly details",
                    "INSERT INTO ArtistAlbumsonly VALUES (?,?,?,?,?,?,?,?)",
                    &[
                        &album_id,
                        lalbum,
                        &album.artistlist,
                        &entry.duplicate,
                        &entry.albumtype,
                        &entry.albumsort,
                        &"",
                        &"",
                    ],
                );
            }
            let exists = conn
                .prepare_cached(
                    "SELECT 1 FROM AlbumartistAlbumsonly
                     WHERE album_id=? AND album=? AND duplicate=? AND albumtype=? AND albumsort=?",
                )
                .and_then(|mut stmt| {
                    stmt.exists(rusqlite::params![
                        album_id,
                        lalbum,
                        entry.duplicate,
                        entry.albumtype,
                        entry.albumsort
                    ])
                })
                .unwrap_or(true);
            if !exists {
                log_action("INSERT AlbumartistAlbumsonly", lalbum);
                exec(
                    conn,
                    stats,
                    "updating albumonly details",
                    "INSERT INTO AlbumartistAlbumsonly VALUES (?,?,?,?,?,?,?,?)",
                    &[
                        &album_id,
                        lalbum,
                        &album.albumartistlist,
                        &entry.duplicate,
                        &entry.albumtype,
                        &entry.albumsort,
                        &"",
                        &"",
                    ],
                );
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::schema::create_database;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_database(&conn).unwrap();
        conn
    }

    fn insert_album(
        conn: &Connection,
        albumlist: &str,
        artistlist: &str,
        tracknumbers: &str,
        year: i64,
    ) {
        conn.execute(
            "INSERT INTO albums (albumlist, artistlist, year, albumartistlist, duplicate,
                cover, artid, inserted, composerlist, tracknumbers, created, lastmodified,
                albumtype, lastplayed, playcount, albumsort)
             VALUES (?,?,?,?,0,'','','','',?,'','',10,'','','')",
            rusqlite::params![albumlist, artistlist, year, artistlist, tracknumbers],
        )
        .unwrap();
    }

    fn entry(album: &str, artist: &str, albumartist: &str, updatetype: UpdateType) -> AlbumsonlyEntry {
        AlbumsonlyEntry {
            album: album.to_string(),
            duplicate: 0,
            albumtype: 10,
            albumsort: String::new(),
            albumlist: vec![album.to_string()],
            updatetype,
            artistlist: artist.to_string(),
            albumartistlist: albumartist.to_string(),
        }
    }

    #[test]
    fn test_rollup_merges_artist_variants() {
        let conn = setup();
        let cfg = Config::default();
        let mut stats = SyncStats::default();
        // the same album title from two artists
        insert_album(&conn, "Split", "ArtistA", "2,4", 2001);
        insert_album(&conn, "Split", "ArtistB", "1,3,n", 1999);

        process(
            &conn,
            &cfg,
            &[entry("Split", "ArtistA", "ArtistA", UpdateType::Insert)],
            &mut stats,
        );

        let (tracknumbers, separated): (String, i64) = conn
            .query_row(
                "SELECT tracknumbers, separated FROM albumsonly WHERE albumlist='Split'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(tracknumbers, "1,2,3,4,n");
        assert_eq!(separated, 0);
        // denormalized fields come from the row with the smallest
        // tracknumbers string (ArtistB's "1,3,n")
        let year: i64 = conn
            .query_row("SELECT year FROM albumsonly WHERE albumlist='Split'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(year, 1999);
        // one lookup row per axis
        let n: i64 = conn
            .query_row("SELECT count(*) FROM ArtistAlbumsonly WHERE album='Split'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn test_separate_album_exception() {
        let conn = setup();
        let mut cfg = Config::default();
        cfg.separate_album_list = vec!["Greatest Hits".to_string()];
        let mut stats = SyncStats::default();
        insert_album(&conn, "Greatest Hits", "ArtistA", "1,2", 1990);
        insert_album(&conn, "Greatest Hits", "ArtistB", "1,2,3", 1995);

        process(
            &conn,
            &cfg,
            &[
                entry("Greatest Hits", "ArtistA", "ArtistA", UpdateType::Insert),
                entry("Greatest Hits", "ArtistB", "ArtistB", UpdateType::Insert),
            ],
            &mut stats,
        );

        let n: i64 = conn
            .query_row(
                "SELECT count(*) FROM albumsonly WHERE albumlist='Greatest Hits' AND separated=1",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(n, 2);
        let tns: String = conn
            .query_row(
                "SELECT tracknumbers FROM albumsonly WHERE artistlist='ArtistA'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(tns, "1,2");
    }

    #[test]
    fn test_rollup_update_then_delete() {
        let conn = setup();
        let cfg = Config::default();
        let mut stats = SyncStats::default();
        insert_album(&conn, "Solo", "ArtistA", "1", 2010);

        process(
            &conn,
            &cfg,
            &[entry("Solo", "ArtistA", "ArtistA", UpdateType::Insert)],
            &mut stats,
        );
        let n: i64 = conn
            .query_row("SELECT count(*) FROM albumsonly", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);

        // album disappears: the roll-up rows go too
        conn.execute("DELETE FROM albums WHERE albumlist='Solo'", [])
            .unwrap();
        process(
            &conn,
            &cfg,
            &[entry("Solo", "ArtistA", "ArtistA", UpdateType::Delete)],
            &mut stats,
        );
        let n: i64 = conn
            .query_row("SELECT count(*) FROM albumsonly", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 0);
        let n: i64 = conn
            .query_row("SELECT count(*) FROM ArtistAlbumsonly", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_rollup_is_idempotent() {
        let conn = setup();
        let cfg = Config::default();
        let mut stats = SyncStats::default();
        insert_album(&conn, "Twice", "ArtistA", "1,2", 2020);

        let entries = [entry("Twice", "ArtistA", "ArtistA", UpdateType::Insert)];
        process(&conn, &cfg, &entries, &mut stats);
        process(&conn, &cfg, &entries, &mut stats);

        let n: i64 = conn
            .query_row("SELECT count(*) FROM albumsonly", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
        let n: i64 = conn
            .query_row("SELECT count(*) FROM ArtistAlbumsonly", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }
}
