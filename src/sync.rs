//! The tag synchronizer.
//!
//! Consumes before/after event pairs and mutates the target database:
//! the tracks table, the albums table with its denormalized
//! lowest-tracknumber fields, the track- and album-level lookup tables,
//! and the name-keyed entity tables. State is not held across pairs; the
//! database itself is checked for duplicates on insert so a rerun of the
//! same batch converges to the same state.
//!
//! Every row mutation is individually guarded: a storage error on one
//! action is logged with the action's label and processing continues with
//! the next action. Atomicity holds at the scan-batch boundary, where the
//! caller owns the transaction.

use anyhow::Result;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, ToSql};

use crate::albumsonly::{self, AlbumsonlyEntry};
use crate::config::{Config, ALBUM_TYPE_PLAIN};
use crate::format::{expand, ListBinding, Structure};
use crate::models::{MultiValue, SqlNum, SyncStats, Tracknumber, UpdateType};
use crate::normalize::{
    adjust_tracknumber, adjust_year, make_int, remove_sep, truncate_number, unwrap_list,
};
use crate::progress::{
    create_progress_bar, format_duration, is_quiet, log_action, log_error, log_progress,
};
use crate::scan::{self, EventPair, RawEvent, SourceTables};

// ============================================================================
// Normalized Images
// ============================================================================

/// One fully normalized row image.
#[derive(Debug, Clone, Default)]
pub struct Image {
    pub id: String,
    pub id2: String,
    pub title: String,
    pub artist: MultiValue,
    pub album: MultiValue,
    pub genre: MultiValue,
    pub albumartist: MultiValue,
    pub composer: MultiValue,
    pub tracknumber: Tracknumber,
    pub year: Option<i64>,
    pub codec: String,
    pub length: SqlNum,
    pub size: SqlNum,
    pub created: i64,
    pub path: String,
    pub filename: String,
    pub discnumber: SqlNum,
    pub comment: String,
    pub folderart: String,
    pub trackart: String,
    pub bitrate: SqlNum,
    pub samplerate: SqlNum,
    pub bitspersample: SqlNum,
    pub channels: SqlNum,
    pub mime: String,
    pub lastmodified: i64,
    pub folderartid: SqlNum,
    pub trackartid: SqlNum,
    pub inserted: i64,
    pub lastscanned: i64,
    pub titlesort: String,
    pub albumsort: String,
    pub artistsort: String,
    pub albumartistsort: String,
    pub composersort: String,
    pub originalalbum: String,
    pub coverart: String,
    pub coverartid: String,
}

/// Normalize one raw event row.
fn normalize_image(raw: &RawEvent, cfg: &Config) -> Image {
    let sep = &cfg.multi_field_separator;

    let title = remove_sep(&raw.title);
    let genre = unwrap_list(&raw.genre, sep, cfg.include_genre, None);
    let artist = unwrap_list(&raw.artist, sep, cfg.include_artist, Some(cfg.the_processing));
    let mut albumartist = unwrap_list(
        &raw.albumartist,
        sep,
        cfg.include_albumartist,
        Some(cfg.the_processing),
    );
    let composer = unwrap_list(
        &raw.composer,
        sep,
        cfg.include_composer,
        Some(cfg.the_processing),
    );
    let album = unwrap_list(&raw.album, sep, cfg.include_album, None);

    // TODO: allow for multiple sort entries (titlesort/albumsort/artistsort)

    // adjust albumartist - if there isn't one, copy in artist
    if albumartist.filtered.is_empty() {
        albumartist = artist.clone();
    }

    Image {
        id: raw.id.clone(),
        id2: raw.id2.clone(),
        title,
        artist,
        album,
        genre,
        albumartist,
        composer,
        tracknumber: adjust_tracknumber(&raw.tracknumber),
        year: adjust_year(&raw.year, &raw.filespec()),
        codec: raw.codec.clone(),
        length: truncate_number(&raw.length),
        size: truncate_number(&raw.size),
        created: make_int(&raw.created),
        path: raw.path.clone(),
        filename: raw.filename.clone(),
        discnumber: truncate_number(&raw.discnumber),
        comment: raw.comment.clone(),
        folderart: raw.folderart.clone(),
        trackart: raw.trackart.clone(),
        bitrate: truncate_number(&raw.bitrate),
        samplerate: truncate_number(&raw.samplerate),
        bitspersample: truncate_number(&raw.bitspersample),
        channels: truncate_number(&raw.channels),
        mime: raw.mime.clone(),
        lastmodified: make_int(&raw.lastmodified),
        folderartid: truncate_number(&raw.folderartid),
        trackartid: truncate_number(&raw.trackartid),
        inserted: make_int(&raw.inserted),
        lastscanned: make_int(&raw.lastscanned),
        titlesort: raw.titlesort.clone(),
        albumsort: raw.albumsort.clone(),
        artistsort: raw.artistsort.clone(),
        albumartistsort: raw.albumartistsort.clone(),
        composersort: raw.composersort.clone(),
        originalalbum: raw.originalalbum.clone(),
        coverart: raw.coverart.clone(),
        coverartid: raw.coverartid.clone(),
    }
}

/// Build the format-evaluation binding for one image. The work or virtual
/// names come from the row's album field (the grouping name the scanner
/// wrote there), routed by the row's kind.
fn list_binding(image: &Image, kind: AlbumKind) -> ListBinding {
    ListBinding {
        artists: image.artist.list.clone(),
        albumartists: image.albumartist.list.clone(),
        composers: image.composer.list.clone(),
        genres: image.genre.list.clone(),
        works: if kind == AlbumKind::Work {
            image.album.list.clone()
        } else {
            Vec::new()
        },
        virtuals: if kind == AlbumKind::Virtual {
            image.album.list.clone()
        } else {
            Vec::new()
        },
        id: image.id.clone(),
        album: image.originalalbum.clone(),
        tracknumber: match image.tracknumber {
            Tracknumber::Present(n) => n.to_string(),
            Tracknumber::Missing => String::new(),
        },
        year: image.year.map(|y| y.to_string()).unwrap_or_default(),
        created: image.created.to_string(),
        lastmodified: image.lastmodified.to_string(),
        inserted: image.inserted.to_string(),
    }
}

// ============================================================================
// Album Entries
// ============================================================================

/// What kind of album grouping a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlbumKind {
    Album,
    Work,
    Virtual,
}

impl AlbumKind {
    fn from_string(s: &str) -> Option<AlbumKind> {
        match s {
            "album" => Some(AlbumKind::Album),
            "work" => Some(AlbumKind::Work),
            "virtual" => Some(AlbumKind::Virtual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryAge {
    Old,
    New,
}

/// One album mutation derived from a pair: a delete of the old grouping
/// name or an insert of the new one.
#[derive(Debug, Clone, PartialEq)]
struct AlbumEntry {
    tracknumber: Tracknumber,
    name: String,
    albumtype: i64,
    age: EntryAge,
}

impl Eq for AlbumEntry {}

// ============================================================================
// Synchronizer
// ============================================================================

pub struct Synchronizer<'c, 'a> {
    conn: &'c Connection,
    cfg: &'a Config,
    pub stats: &'a mut SyncStats,
    /// Albumsonly roll-up input accumulated across the batch.
    albumsonly: Vec<AlbumsonlyEntry>,
    /// Highest lastscanned stamp seen in the batch.
    pub last_scan_stamp: i64,
}

impl<'c, 'a> Synchronizer<'c, 'a> {
    pub fn new(conn: &'c Connection, cfg: &'a Config, stats: &'a mut SyncStats) -> Self {
        Synchronizer {
            conn,
            cfg,
            stats,
            albumsonly: Vec::new(),
            last_scan_stamp: 0,
        }
    }

    /// Execute one mutation, logging a failure under its action label and
    /// carrying on.
    fn exec(&mut self, label: &str, sql: &str, params: &[&dyn ToSql]) -> usize {
        let result = self
            .conn
            .prepare_cached(sql)
            .and_then(|mut stmt| stmt.execute(params));
        match result {
            Ok(n) => n,
            Err(e) => {
                log_error(&format!("Error {}: {}", label, e));
                self.stats.row_errors += 1;
                0
            }
        }
    }

    /// Process one before/after pair.
    pub fn process_pair(&mut self, pair: &EventPair) {
        let updatetype = match UpdateType::from_code(&pair.new.updatetype) {
            Some(t) => t,
            None => {
                log_error(&format!(
                    "unknown update type '{}' for id {}",
                    pair.new.updatetype, pair.new.id
                ));
                self.stats.pairs_skipped += 1;
                return;
            }
        };
        let kind = match AlbumKind::from_string(&pair.new.albumtypestring) {
            Some(k) => k,
            None => {
                log_error(&format!(
                    "unknown album type '{}' for id {}",
                    pair.new.albumtypestring, pair.new.id
                ));
                self.stats.pairs_skipped += 1;
                return;
            }
        };

        let old = normalize_image(&pair.old, self.cfg);
        let new = normalize_image(&pair.new, self.cfg);

        // save latest scan time
        if new.lastscanned > self.last_scan_stamp {
            self.last_scan_stamp = new.lastscanned;
        }

        // track identity in the target: rowid and any duplicate counter
        // assigned when the track was first inserted
        let mut track_rowid: i64 = 0;
        let mut o_duplicate: i64 = 0;
        let mut duplicate: i64 = 0;

        if kind != AlbumKind::Album || updatetype.has_old_image() {
            // existing track: fetch rowid and the stored duplicate, which
            // the update images don't carry
            let found = self
                .conn
                .query_row(
                    "SELECT rowid, id, duplicate FROM tracks WHERE path=? AND filename=?",
                    rusqlite::params![old.path, old.filename],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )
                .optional();
            match found {
                Ok(Some((rowid, _id, dup))) => {
                    track_rowid = rowid;
                    o_duplicate = dup;
                    duplicate = dup;
                }
                Ok(None) => {}
                Err(e) => {
                    log_error(&format!("Error getting track id: {}", e));
                    self.stats.row_errors += 1;
                }
            }
        }

        if kind == AlbumKind::Album {
            match updatetype {
                UpdateType::Delete => {
                    log_action("DELETE TRACK", &old.id);
                    let n = self.exec(
                        "deleting track details",
                        "DELETE FROM tracks WHERE id=?",
                        &[&new.id],
                    );
                    self.stats.tracks_deleted += n;
                }
                UpdateType::Insert => {
                    match self.insert_track(&new) {
                        Some(dup) => {
                            duplicate = dup;
                            track_rowid = self.conn.last_insert_rowid();
                        }
                        None => {
                            // the track id is already present: this batch
                            // was applied before, and reapplying it must
                            // be a no-op
                            self.stats.pairs_skipped += 1;
                            return;
                        }
                    }
                }
                UpdateType::Update => {
                    self.update_track(&new, o_duplicate);
                }
            }
        }

        // album entries: one keyed by the concatenated album string for
        // plain albums, or the expansion of every configured structure for
        // works and virtuals
        let mut entries: Vec<AlbumEntry> = Vec::new();
        match kind {
            AlbumKind::Album => {
                if updatetype.has_old_image() {
                    entries.push(AlbumEntry {
                        tracknumber: old.tracknumber,
                        name: old.album.full.clone(),
                        albumtype: ALBUM_TYPE_PLAIN,
                        age: EntryAge::Old,
                    });
                }
                if updatetype.has_new_image() {
                    entries.push(AlbumEntry {
                        tracknumber: new.tracknumber,
                        name: new.album.full.clone(),
                        albumtype: ALBUM_TYPE_PLAIN,
                        age: EntryAge::New,
                    });
                }
            }
            AlbumKind::Work | AlbumKind::Virtual => {
                let structures: &[Structure] = if kind == AlbumKind::Work {
                    &self.cfg.work_structures
                } else {
                    &self.cfg.virtual_structures
                };
                if updatetype.has_old_image() {
                    let binding = list_binding(&old, kind);
                    for structure in structures {
                        for name in expand(&structure.template, &binding) {
                            let entry = AlbumEntry {
                                tracknumber: old.tracknumber,
                                name,
                                albumtype: structure.number,
                                age: EntryAge::Old,
                            };
                            if !entries.contains(&entry) {
                                entries.push(entry);
                            }
                        }
                    }
                }
                if updatetype.has_new_image() {
                    let binding = list_binding(&new, kind);
                    for structure in structures {
                        for name in expand(&structure.template, &binding) {
                            let entry = AlbumEntry {
                                tracknumber: new.tracknumber,
                                name,
                                albumtype: structure.number,
                                age: EntryAge::New,
                            };
                            if !entries.contains(&entry) {
                                entries.push(entry);
                            }
                        }
                    }
                }
            }
        }

        // set art at album level
        let (cover, artid) = choose_cover(&new, self.cfg.prefer_folderart);

        for entry in entries.clone() {
            let album_id = match entry.age {
                EntryAge::Old => self.album_delete(&entry, &old, o_duplicate, kind),
                EntryAge::New => {
                    // a work/virtual contribution already enumerated in
                    // TrackNumbers is a replay; its tracknumber is in the
                    // album's list and must not be merged again
                    let skip_merge = kind != AlbumKind::Album
                        && self.lookup_exists(
                            "SELECT 1 FROM TrackNumbers
                             WHERE track_id=? AND dummyalbum=? AND duplicate=? AND albumtype=? AND tracknumber=?",
                            &[
                                &track_rowid,
                                &entry.name,
                                &duplicate,
                                &entry.albumtype,
                                &entry.tracknumber,
                            ],
                        );
                    self.album_insert(&entry, &new, duplicate, &cover, &artid, skip_merge, kind)
                }
            };

            // lookup names: plain albums fan out over the parsed album
            // names, works and virtuals over the generated name
            let (lookup_albums, image, entry_duplicate) = match entry.age {
                EntryAge::Old => {
                    if kind == AlbumKind::Album {
                        (old.album.list.clone(), &old, o_duplicate)
                    } else {
                        (vec![entry.name.clone()], &old, o_duplicate)
                    }
                }
                EntryAge::New => {
                    if kind == AlbumKind::Album {
                        (new.album.list.clone(), &new, duplicate)
                    } else {
                        (vec![entry.name.clone()], &new, duplicate)
                    }
                }
            };
            let image = image.clone();

            // save the album for albumsonly processing at batch end; it is
            // only processed once per album
            let aoentry = AlbumsonlyEntry {
                album: entry.name.clone(),
                duplicate: entry_duplicate,
                albumtype: entry.albumtype,
                albumsort: image.albumsort.clone(),
                albumlist: lookup_albums.clone(),
                updatetype: match entry.age {
                    EntryAge::Old => UpdateType::Delete,
                    EntryAge::New => UpdateType::Insert,
                },
                artistlist: image.artist.filtered.clone(),
                albumartistlist: image.albumartist.filtered.clone(),
            };
            if !self.albumsonly.contains(&aoentry) {
                self.albumsonly.push(aoentry);
            }

            match entry.age {
                EntryAge::Old => {
                    self.track_lookups_delete(
                        &entry,
                        &image,
                        track_rowid,
                        o_duplicate,
                        album_id,
                        kind,
                    );
                    self.album_lookups_delete(&image, o_duplicate, &entry, album_id);
                }
                EntryAge::New => {
                    self.track_lookups_insert(
                        &entry,
                        &image,
                        &lookup_albums,
                        track_rowid,
                        duplicate,
                        album_id,
                        kind,
                    );
                    self.album_lookups_insert(&image, duplicate, &entry, &lookup_albums, album_id);
                }
            }
        }

        // entity tables once per pair
        self.process_entities(updatetype, &old, &new);

        self.stats.pairs_processed += 1;
    }

    // ------------------------------------------------------------------
    // Tracks
    // ------------------------------------------------------------------

    /// Insert a new track. A collision on (title, album, artist,
    /// tracknumber) is expected for duplicate names; the downstream server
    /// rejects them, so the title gets a " (N)" suffix with the lowest
    /// unused N and the duplicate counter records it.
    fn insert_track(&mut self, new: &Image) -> Option<i64> {
        log_action("INSERT TRACK", &new.id);
        match attempt_track_insert(self.conn, new, &new.title, 0) {
            Ok(_) => {
                self.stats.tracks_inserted += 1;
                Some(0)
            }
            Err(_) => {
                // an id collision means the batch is being replayed, not
                // that two names clash
                let replayed = self
                    .conn
                    .prepare_cached("SELECT 1 FROM tracks WHERE id=?")
                    .and_then(|mut stmt| stmt.exists([&new.id]))
                    .unwrap_or(false);
                if replayed {
                    return None;
                }
                // assume we have a duplicate: find the highest suffix
                // already assigned to this title and take the next one
                let tstring = format!("{} (%", new.title);
                let max_dup: Option<i64> = match self.conn.query_row(
                    "SELECT max(duplicate) FROM tracks WHERE title LIKE ? AND album=? AND artist=? AND tracknumber=?",
                    rusqlite::params![tstring, new.album.full, new.artist.filtered, new.tracknumber],
                    |row| row.get(0),
                ) {
                    Ok(v) => v,
                    Err(e) => {
                        log_error(&format!(
                            "Error finding max duplicate on track insert: {}",
                            e
                        ));
                        self.stats.row_errors += 1;
                        return Some(0);
                    }
                };
                // second entry is the special case: the first collision
                // won't have been suffixed, so counting starts at 2
                let tcount = match max_dup {
                    Some(d) if d != 0 => d + 1,
                    _ => 2,
                };
                let suffixed = format!("{} ({})", new.title, tcount);
                log_action("INSERT TRACK", &suffixed);
                match attempt_track_insert(self.conn, new, &suffixed, tcount) {
                    Ok(_) => {
                        self.stats.tracks_inserted += 1;
                        self.stats.duplicates_assigned += 1;
                        Some(tcount)
                    }
                    Err(e) => {
                        log_error(&format!(
                            "Error performing duplicate processing on track insert: {}",
                            e
                        ));
                        self.stats.row_errors += 1;
                        Some(0)
                    }
                }
            }
        }
    }

    /// Update an existing track with the after image. A previously
    /// disambiguated title keeps its " (N)" suffix.
    fn update_track(&mut self, new: &Image, o_duplicate: i64) {
        let title = if o_duplicate != 0 {
            format!("{} ({})", new.title, o_duplicate)
        } else {
            new.title.clone()
        };
        log_action("UPDATE TRACK", &new.id);
        let n = self.exec(
            "updating track details",
            "UPDATE tracks SET
                id2=?, title=?, artist=?, artistfull=?, album=?,
                genre=?, tracknumber=?, year=?,
                albumartist=?, albumartistfull=?, composer=?, composerfull=?, codec=?,
                length=?, size=?,
                created=?,
                discnumber=?, comment=?,
                folderart=?, trackart=?,
                bitrate=?, samplerate=?,
                bitspersample=?, channels=?, mime=?,
                lastmodified=?,
                folderartid=?, trackartid=?,
                inserted=?, lastscanned=?,
                titlesort=?, albumsort=?
                WHERE id=?",
            &[
                &new.id2,
                &title,
                &new.artist.filtered,
                &new.artist.full,
                &new.album.full,
                &new.genre.full,
                &new.tracknumber,
                &new.year,
                &new.albumartist.filtered,
                &new.albumartist.full,
                &new.composer.filtered,
                &new.composer.full,
                &new.codec,
                &new.length,
                &new.size,
                &new.created,
                &new.discnumber,
                &new.comment,
                &new.folderart,
                &new.trackart,
                &new.bitrate,
                &new.samplerate,
                &new.bitspersample,
                &new.channels,
                &new.mime,
                &new.lastmodified,
                &new.folderartid,
                &new.trackartid,
                &new.inserted,
                &new.lastscanned,
                &new.titlesort,
                &new.albumsort,
                &new.id,
            ],
        );
        if n > 0 {
            self.stats.tracks_updated += 1;
        }
    }

    // ------------------------------------------------------------------
    // Albums
    // ------------------------------------------------------------------

    /// Handle the old image of an album entry: drop the deleted track's
    /// number from the album's list, reselecting the denormalized fields
    /// when that track was the metadata source, or delete the album when
    /// it was the last contributor.
    fn album_delete(
        &mut self,
        entry: &AlbumEntry,
        old: &Image,
        o_duplicate: i64,
        kind: AlbumKind,
    ) -> Option<i64> {
        let found = self
            .conn
            .query_row(
                "SELECT id, tracknumbers FROM albums
                 WHERE albumlist=? AND artistlist=? AND albumartistlist=? AND duplicate=? AND albumtype=?",
                rusqlite::params![
                    entry.name,
                    old.artist.filtered,
                    old.albumartist.filtered,
                    o_duplicate,
                    entry.albumtype
                ],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional();
        let (album_id, tracknumbers) = match found {
            Ok(Some(row)) => row,
            Ok(None) => return None,
            Err(e) => {
                log_error(&format!("Error getting album id: {}", e));
                self.stats.row_errors += 1;
                return None;
            }
        };

        let mut s_tracks: Vec<String> = tracknumbers.split(',').map(|s| s.to_string()).collect();
        if s_tracks.len() != 1 {
            // more than one track associated with this album
            let token = entry.tracknumber.to_list_token();
            if s_tracks[0] == token {
                // the album details were set from the track being deleted,
                // reselect them from the next lowest tracknumber
                s_tracks.remove(0);
                let new_track = Tracknumber::from_list_token(&s_tracks[0]);
                let joined = s_tracks.join(",");
                if kind != AlbumKind::Album {
                    // works and virtuals keep their details, which come
                    // from the grouping definition rather than a track
                    log_action("UPDATE ALBUM", &joined);
                    self.exec(
                        "resetting album details (workvirtual)",
                        "UPDATE albums SET tracknumbers=? WHERE id=?",
                        &[&joined, &album_id],
                    );
                    self.stats.albums_updated += 1;
                } else {
                    self.reselect_album_details(entry, old, o_duplicate, album_id, new_track, &joined);
                }
            } else {
                // we can just remove the track from the list
                if let Some(pos) = s_tracks.iter().position(|t| *t == token) {
                    s_tracks.remove(pos);
                }
                let joined = s_tracks.join(",");
                log_action("UPDATE ALBUM TRACKNUMBERS", &joined);
                self.exec(
                    "updating album tracknumbers",
                    "UPDATE albums SET tracknumbers=? WHERE id=?",
                    &[&joined, &album_id],
                );
                self.stats.albums_updated += 1;
            }
        } else {
            // last track, can delete album if no other track refers to it
            log_action("DELETE ALBUM", &entry.name);
            let n = self.exec(
                "deleting album details",
                "DELETE FROM albums WHERE NOT EXISTS
                    (SELECT 1 FROM tracks WHERE album=? AND artist=? AND albumartist=? AND duplicate=? AND albumtype=?)
                 AND id=?",
                &[
                    &entry.name,
                    &old.artist.filtered,
                    &old.albumartist.filtered,
                    &o_duplicate,
                    &entry.albumtype,
                    &album_id,
                ],
            );
            if n > 0 {
                self.stats.albums_deleted += 1;
            }
        }
        Some(album_id)
    }

    /// Rewrite an album's denormalized fields from the track that now owns
    /// the lowest tracknumber.
    fn reselect_album_details(
        &mut self,
        entry: &AlbumEntry,
        old: &Image,
        o_duplicate: i64,
        album_id: i64,
        new_track: Tracknumber,
        tracknumbers: &str,
    ) {
        let selected = self
            .conn
            .query_row(
                "SELECT year, folderart, trackart, folderartid, trackartid, inserted, composer, created, lastmodified, albumsort
                 FROM tracks WHERE album=? AND artist=? AND albumartist=? AND duplicate=? AND tracknumber=?",
                rusqlite::params![
                    entry.name,
                    old.artist.filtered,
                    old.albumartist.filtered,
                    o_duplicate,
                    new_track
                ],
                |row| {
                    Ok((
                        row.get::<_, Value>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Value>(3)?,
                        row.get::<_, Value>(4)?,
                        row.get::<_, Value>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, Value>(7)?,
                        row.get::<_, Value>(8)?,
                        row.get::<_, String>(9)?,
                    ))
                },
            )
            .optional();

        let (n_year, n_folderart, n_trackart, n_folderartid, n_trackartid, n_inserted, n_composer, n_created, n_lastmodified, n_albumsort) =
            match selected {
                Ok(Some(row)) => row,
                Ok(None) => {
                    // TODO: check why we sometimes don't get a row here
                    let blank = || Value::Text(String::new());
                    (
                        blank(),
                        String::new(),
                        String::new(),
                        blank(),
                        blank(),
                        blank(),
                        String::new(),
                        blank(),
                        blank(),
                        String::new(),
                    )
                }
                Err(e) => {
                    log_error(&format!("Error getting track details: {}", e));
                    self.stats.row_errors += 1;
                    return;
                }
            };

        // set art
        let (n_cover, n_artid): (String, Value) = if !n_folderart.is_empty() && self.cfg.prefer_folderart {
            (n_folderart, n_folderartid)
        } else if !n_trackart.is_empty() {
            (n_trackart, n_trackartid)
        } else {
            (String::new(), Value::Text(String::new()))
        };

        log_action("UPDATE ALBUM", &entry.name);
        let n = self.exec(
            "resetting album details",
            "UPDATE albums SET
                year=?, cover=?, artid=?, inserted=?, composerlist=?,
                tracknumbers=?, created=?, lastmodified=?, albumsort=?
             WHERE id=?",
            &[
                &n_year,
                &n_cover,
                &n_artid,
                &n_inserted,
                &n_composer,
                &tracknumbers,
                &n_created,
                &n_lastmodified,
                &n_albumsort,
                &album_id,
            ],
        );
        if n > 0 {
            self.stats.albums_updated += 1;
        }
    }

    /// Handle the new image of an album entry: extend an existing album's
    /// tracknumber list (rewriting the denormalized fields when the new
    /// track is lower-numbered than the current source), or insert a fresh
    /// album row.
    fn album_insert(
        &mut self,
        entry: &AlbumEntry,
        new: &Image,
        duplicate: i64,
        cover: &str,
        artid: &Value,
        skip_merge: bool,
        kind: AlbumKind,
    ) -> Option<i64> {
        let found = self
            .conn
            .query_row(
                "SELECT id, tracknumbers FROM albums
                 WHERE albumlist=? AND artistlist=? AND albumartistlist=? AND duplicate=? AND albumtype=?",
                rusqlite::params![
                    entry.name,
                    new.artist.filtered,
                    new.albumartist.filtered,
                    duplicate,
                    entry.albumtype
                ],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional();

        match found {
            Ok(Some((album_id, tracknumbers))) => {
                if skip_merge {
                    return Some(album_id);
                }
                let tokens: Vec<&str> = tracknumbers.split(',').collect();
                if kind == AlbumKind::Album {
                    // the list must carry one token per contributing track;
                    // when it already accounts for every track at this
                    // number (an unchanged-key update, or a replay) there
                    // is nothing to merge
                    let token = entry.tracknumber.to_list_token();
                    let token_count = tokens.iter().filter(|&&t| t == token).count() as i64;
                    let track_count: i64 = self
                        .conn
                        .query_row(
                            "SELECT count(*) FROM tracks
                             WHERE album=? AND artist=? AND albumartist=? AND duplicate=? AND tracknumber=?",
                            rusqlite::params![
                                entry.name,
                                new.artist.filtered,
                                new.albumartist.filtered,
                                duplicate,
                                entry.tracknumber
                            ],
                            |row| row.get(0),
                        )
                        .unwrap_or(0);
                    if token_count >= track_count {
                        return Some(album_id);
                    }
                }
                // merge the new tracknumber into the sorted list
                let mut ints: Vec<i64> = tokens
                    .iter()
                    .filter(|&&t| t != "n")
                    .filter_map(|t| t.parse::<i64>().ok())
                    .collect();
                let mut n_tokens: Vec<&str> =
                    tokens.iter().filter(|&&t| t == "n").copied().collect();
                let lowest_track: Option<i64> = ints.first().copied();
                match entry.tracknumber {
                    Tracknumber::Present(t) => {
                        ints.push(t);
                        ints.sort_unstable();
                    }
                    Tracknumber::Missing => n_tokens.push("n"),
                }
                let mut joined: Vec<String> = ints.iter().map(|t| t.to_string()).collect();
                joined.extend(n_tokens.iter().map(|t| t.to_string()));
                let tracknumbers = joined.join(",");

                // a lower-numbered track than the stored source rewrites
                // the album details
                let is_lower = match (lowest_track, entry.tracknumber) {
                    (None, _) => true,
                    (Some(lowest), tn) => tn < Tracknumber::Present(lowest),
                };
                if is_lower {
                    log_action("UPDATE ALBUM", &entry.name);
                    self.exec(
                        "inserting/updating album details",
                        "UPDATE albums SET
                            albumlist=?, artistlist=?, year=?, albumartistlist=?, duplicate=?,
                            cover=?, artid=?, inserted=?, composerlist=?, tracknumbers=?,
                            created=?, lastmodified=?, albumtype=?, albumsort=?
                         WHERE id=?",
                        &[
                            &entry.name,
                            &new.artist.filtered,
                            &new.year,
                            &new.albumartist.filtered,
                            &duplicate,
                            &cover,
                            artid,
                            &new.inserted,
                            &new.composer.filtered,
                            &tracknumbers,
                            &new.created,
                            &new.lastmodified,
                            &entry.albumtype,
                            &new.albumsort,
                            &album_id,
                        ],
                    );
                } else {
                    // just store the tracknumber
                    log_action("UPDATE ALBUM TRACKNUMBERS", &tracknumbers);
                    self.exec(
                        "inserting/updating album details",
                        "UPDATE albums SET tracknumbers=? WHERE id=?",
                        &[&tracknumbers, &album_id],
                    );
                }
                self.stats.albums_updated += 1;
                Some(album_id)
            }
            Ok(None) => {
                let tracknumbers = entry.tracknumber.to_list_token();
                log_action("INSERT ALBUM", &entry.name);
                let n = self.exec(
                    "inserting album details",
                    "INSERT INTO albums VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
                    &[
                        &Value::Null,
                        &entry.name,
                        &new.artist.filtered,
                        &new.year,
                        &new.albumartist.filtered,
                        &duplicate,
                        &cover,
                        artid,
                        &new.inserted,
                        &new.composer.filtered,
                        &tracknumbers,
                        &new.created,
                        &new.lastmodified,
                        &entry.albumtype,
                        &"",
                        &"",
                        &new.albumsort,
                    ],
                );
                if n > 0 {
                    self.stats.albums_inserted += 1;
                    Some(self.conn.last_insert_rowid())
                } else {
                    None
                }
            }
            Err(e) => {
                log_error(&format!("Error inserting/updating album details: {}", e));
                self.stats.row_errors += 1;
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Track-level lookups
    // ------------------------------------------------------------------

    fn track_lookups_delete(
        &mut self,
        entry: &AlbumEntry,
        old: &Image,
        track_rowid: i64,
        o_duplicate: i64,
        album_id: Option<i64>,
        kind: AlbumKind,
    ) {
        let album_id = album_id.map(Value::Integer).unwrap_or(Value::Null);

        // these lookups are unique on track id so nothing else refers to
        // them (just delete)
        for genre in &old.genre.list {
            for artist in &old.artist.list {
                log_action("DELETE GenreArtistAlbumTrack", artist);
                let n = self.exec(
                    "deleting lookup details",
                    "DELETE FROM GenreArtistAlbumTrack
                     WHERE track_id=? AND genre=? AND artist=? AND album_id=? AND duplicate=? AND albumtype=?",
                    &[&track_rowid, genre, artist, &album_id, &o_duplicate, &entry.albumtype],
                );
                self.stats.lookups_deleted += n;
            }
            for albumartist in &old.albumartist.list {
                log_action("DELETE GenreAlbumartistAlbumTrack", albumartist);
                let n = self.exec(
                    "deleting lookup details",
                    "DELETE FROM GenreAlbumartistAlbumTrack
                     WHERE track_id=? AND genre=? AND albumartist=? AND album_id=? AND duplicate=? AND albumtype=?",
                    &[&track_rowid, genre, albumartist, &album_id, &o_duplicate, &entry.albumtype],
                );
                self.stats.lookups_deleted += n;
            }
        }
        for artist in &old.artist.list {
            log_action("DELETE ArtistAlbumTrack", artist);
            let n = self.exec(
                "deleting lookup details",
                "DELETE FROM ArtistAlbumTrack
                 WHERE track_id=? AND artist=? AND album_id=? AND duplicate=? AND albumtype=?",
                &[&track_rowid, artist, &album_id, &o_duplicate, &entry.albumtype],
            );
            self.stats.lookups_deleted += n;
        }
        for albumartist in &old.albumartist.list {
            log_action("DELETE AlbumartistAlbumTrack", albumartist);
            let n = self.exec(
                "deleting lookup details",
                "DELETE FROM AlbumartistAlbumTrack
                 WHERE track_id=? AND albumartist=? AND album_id=? AND duplicate=? AND albumtype=?",
                &[&track_rowid, albumartist, &album_id, &o_duplicate, &entry.albumtype],
            );
            self.stats.lookups_deleted += n;
        }
        for composer in &old.composer.list {
            log_action("DELETE ComposerAlbumTrack", composer);
            let n = self.exec(
                "deleting lookup details",
                "DELETE FROM ComposerAlbumTrack
                 WHERE track_id=? AND composer=? AND album_id=? AND duplicate=? AND albumtype=?",
                &[&track_rowid, composer, &album_id, &o_duplicate, &entry.albumtype],
            );
            self.stats.lookups_deleted += n;
        }

        if kind != AlbumKind::Album {
            // per-work/virtual track enumeration, keyed on the full tuple
            for genre in old.genre.list_or_blank() {
                for artist in old.artist.list_or_blank() {
                    for albumartist in old.albumartist.list_or_blank() {
                        for composer in old.composer.list_or_blank() {
                            log_action("DELETE TrackNumbers", &entry.name);
                            let n = self.exec(
                                "deleting lookup details",
                                "DELETE FROM TrackNumbers
                                 WHERE track_id=? AND genre=? AND artist=? AND albumartist=? AND album=? AND dummyalbum=?
                                   AND composer=? AND duplicate=? AND albumtype=? AND tracknumber=? AND coverart=? AND coverartid=?",
                                &[
                                    &track_rowid,
                                    &genre,
                                    &artist,
                                    &albumartist,
                                    &old.originalalbum,
                                    &entry.name,
                                    &composer,
                                    &o_duplicate,
                                    &entry.albumtype,
                                    &entry.tracknumber,
                                    &old.coverart,
                                    &old.coverartid,
                                ],
                            );
                            self.stats.lookups_deleted += n;
                        }
                    }
                }
            }
        }
    }

    fn track_lookups_insert(
        &mut self,
        entry: &AlbumEntry,
        new: &Image,
        lookup_albums: &[String],
        track_rowid: i64,
        duplicate: i64,
        album_id: Option<i64>,
        kind: AlbumKind,
    ) {
        let album_id = album_id.map(Value::Integer).unwrap_or(Value::Null);

        for album in lookup_albums {
            for genre in &new.genre.list {
                for artist in &new.artist.list {
                    let exists = self.lookup_exists(
                        "SELECT 1 FROM GenreArtistAlbumTrack
                         WHERE track_id=? AND genre=? AND artist=? AND album_id=? AND duplicate=? AND albumtype=?",
                        &[&track_rowid, genre, artist, &album_id, &duplicate, &entry.albumtype],
                    );
                    if !exists {
                        log_action("INSERT GenreArtistAlbumTrack", artist);
                        let n = self.exec(
                            "inserting album/track lookup details",
                            "INSERT INTO GenreArtistAlbumTrack VALUES (?,?,?,?,?,?,?)",
                            &[&track_rowid, genre, artist, album, &album_id, &duplicate, &entry.albumtype],
                        );
                        self.stats.lookups_inserted += n;
                    }
                }
                for albumartist in &new.albumartist.list {
                    let exists = self.lookup_exists(
                        "SELECT 1 FROM GenreAlbumartistAlbumTrack
                         WHERE track_id=? AND genre=? AND albumartist=? AND album_id=? AND duplicate=? AND albumtype=?",
                        &[&track_rowid, genre, albumartist, &album_id, &duplicate, &entry.albumtype],
                    );
                    if !exists {
                        log_action("INSERT GenreAlbumartistAlbumTrack", albumartist);
                        let n = self.exec(
                            "inserting album/track lookup details",
                            "INSERT INTO GenreAlbumartistAlbumTrack VALUES (?,?,?,?,?,?,?)",
                            &[&track_rowid, genre, albumartist, album, &album_id, &duplicate, &entry.albumtype],
                        );
                        self.stats.lookups_inserted += n;
                    }
                }
            }
            for artist in &new.artist.list {
                let exists = self.lookup_exists(
                    "SELECT 1 FROM ArtistAlbumTrack
                     WHERE track_id=? AND artist=? AND album_id=? AND duplicate=? AND albumtype=?",
                    &[&track_rowid, artist, &album_id, &duplicate, &entry.albumtype],
                );
                if !exists {
                    log_action("INSERT ArtistAlbumTrack", artist);
                    let n = self.exec(
                        "inserting album/track lookup details",
                        "INSERT INTO ArtistAlbumTrack VALUES (?,?,?,?,?,?)",
                        &[&track_rowid, artist, album, &album_id, &duplicate, &entry.albumtype],
                    );
                    self.stats.lookups_inserted += n;
                }
            }
            for albumartist in &new.albumartist.list {
                let exists = self.lookup_exists(
                    "SELECT 1 FROM AlbumartistAlbumTrack
                     WHERE track_id=? AND albumartist=? AND album_id=? AND duplicate=? AND albumtype=?",
                    &[&track_rowid, albumartist, &album_id, &duplicate, &entry.albumtype],
                );
                if !exists {
                    log_action("INSERT AlbumartistAlbumTrack", albumartist);
                    let n = self.exec(
                        "inserting album/track lookup details",
                        "INSERT INTO AlbumartistAlbumTrack VALUES (?,?,?,?,?,?)",
                        &[&track_rowid, albumartist, album, &album_id, &duplicate, &entry.albumtype],
                    );
                    self.stats.lookups_inserted += n;
                }
            }
            for composer in &new.composer.list {
                let exists = self.lookup_exists(
                    "SELECT 1 FROM ComposerAlbumTrack
                     WHERE track_id=? AND composer=? AND album_id=? AND duplicate=? AND albumtype=?",
                    &[&track_rowid, composer, &album_id, &duplicate, &entry.albumtype],
                );
                if !exists {
                    log_action("INSERT ComposerAlbumTrack", composer);
                    let n = self.exec(
                        "inserting album/track lookup details",
                        "INSERT INTO ComposerAlbumTrack VALUES (?,?,?,?,?,?)",
                        &[&track_rowid, composer, album, &album_id, &duplicate, &entry.albumtype],
                    );
                    self.stats.lookups_inserted += n;
                }
            }
        }

        if kind != AlbumKind::Album {
            for genre in new.genre.list_or_blank() {
                for artist in new.artist.list_or_blank() {
                    for albumartist in new.albumartist.list_or_blank() {
                        for composer in new.composer.list_or_blank() {
                            let params: [&dyn ToSql; 12] = [
                                &track_rowid,
                                &genre,
                                &artist,
                                &albumartist,
                                &new.originalalbum,
                                &entry.name,
                                &composer,
                                &duplicate,
                                &entry.albumtype,
                                &entry.tracknumber,
                                &new.coverart,
                                &new.coverartid,
                            ];
                            let exists = self.lookup_exists(
                                "SELECT 1 FROM TrackNumbers
                                 WHERE track_id=? AND genre=? AND artist=? AND albumartist=? AND album=? AND dummyalbum=?
                                   AND composer=? AND duplicate=? AND albumtype=? AND tracknumber=? AND coverart=? AND coverartid=?",
                                &params,
                            );
                            if !exists {
                                log_action("INSERT TrackNumbers", &entry.name);
                                let n = self.exec(
                                    "inserting album/track lookup details",
                                    "INSERT INTO TrackNumbers VALUES (?,?,?,?,?,?,?,?,?,?,?,?)",
                                    &params,
                                );
                                self.stats.lookups_inserted += n;
                            }
                        }
                    }
                }
            }
        }
    }

    fn lookup_exists(&mut self, sql: &str, params: &[&dyn ToSql]) -> bool {
        let result = self
            .conn
            .prepare_cached(sql)
            .and_then(|mut stmt| stmt.exists(params));
        match result {
            Ok(found) => found,
            Err(e) => {
                log_error(&format!("Error checking lookup details: {}", e));
                self.stats.row_errors += 1;
                // claim existence so the insert is skipped rather than
                // risking a duplicate row
                true
            }
        }
    }

    // ------------------------------------------------------------------
    // Album-level lookups
    // ------------------------------------------------------------------

    /// Reference-counted deletes: an album-level lookup row goes away only
    /// when no track-level row refers to it any more, checked with NOT
    /// EXISTS inside the same statement.
    fn album_lookups_delete(
        &mut self,
        old: &Image,
        o_duplicate: i64,
        entry: &AlbumEntry,
        album_id: Option<i64>,
    ) {
        let album_id = album_id.map(Value::Integer).unwrap_or(Value::Null);

        for genre in &old.genre.list {
            for artist in &old.artist.list {
                log_action("DELETE GenreArtist", artist);
                let n = self.exec(
                    "deleting artist lookup details",
                    "DELETE FROM GenreArtist WHERE NOT EXISTS
                        (SELECT 1 FROM GenreArtistAlbum WHERE genre=? AND artist=?)
                     AND genre=? AND artist=?",
                    &[genre, artist, genre, artist],
                );
                self.stats.lookups_deleted += n;
                log_action("DELETE GenreArtistAlbum", artist);
                let n = self.exec(
                    "deleting artist lookup details",
                    "DELETE FROM GenreArtistAlbum WHERE NOT EXISTS
                        (SELECT 1 FROM GenreArtistAlbumTrack WHERE genre=? AND artist=? AND album_id=? AND duplicate=? AND albumtype=?)
                     AND album_id=?",
                    &[genre, artist, &album_id, &o_duplicate, &entry.albumtype, &album_id],
                );
                self.stats.lookups_deleted += n;
            }
            for albumartist in &old.albumartist.list {
                log_action("DELETE GenreAlbumartist", albumartist);
                let n = self.exec(
                    "deleting artist lookup details",
                    "DELETE FROM GenreAlbumartist WHERE NOT EXISTS
                        (SELECT 1 FROM GenreAlbumartistAlbum WHERE genre=? AND albumartist=?)
                     AND genre=? AND albumartist=?",
                    &[genre, albumartist, genre, albumartist],
                );
                self.stats.lookups_deleted += n;
                log_action("DELETE GenreAlbumartistAlbum", albumartist);
                let n = self.exec(
                    "deleting artist lookup details",
                    "DELETE FROM GenreAlbumartistAlbum WHERE NOT EXISTS
                        (SELECT 1 FROM GenreAlbumartistAlbumTrack WHERE genre=? AND albumartist=? AND album_id=? AND duplicate=? AND albumtype=?)
                     AND album_id=?",
                    &[genre, albumartist, &album_id, &o_duplicate, &entry.albumtype, &album_id],
                );
                self.stats.lookups_deleted += n;
            }
        }
        for artist in &old.artist.list {
            log_action("DELETE ArtistAlbum", artist);
            let n = self.exec(
                "deleting artist lookup details",
                "DELETE FROM ArtistAlbum WHERE NOT EXISTS
                    (SELECT 1 FROM ArtistAlbumTrack WHERE artist=? AND album_id=? AND duplicate=? AND albumtype=?)
                 AND album_id=?",
                &[artist, &album_id, &o_duplicate, &entry.albumtype, &album_id],
            );
            self.stats.lookups_deleted += n;
        }
        for albumartist in &old.albumartist.list {
            log_action("DELETE AlbumartistAlbum", albumartist);
            let n = self.exec(
                "deleting artist lookup details",
                "DELETE FROM AlbumartistAlbum WHERE NOT EXISTS
                    (SELECT 1 FROM AlbumartistAlbumTrack WHERE albumartist=? AND album_id=? AND duplicate=? AND albumtype=?)
                 AND album_id=?",
                &[albumartist, &album_id, &o_duplicate, &entry.albumtype, &album_id],
            );
            self.stats.lookups_deleted += n;
        }
        for composer in &old.composer.list {
            log_action("DELETE ComposerAlbum", composer);
            let n = self.exec(
                "deleting artist lookup details",
                "DELETE FROM ComposerAlbum WHERE NOT EXISTS
                    (SELECT 1 FROM ComposerAlbumTrack WHERE composer=? AND album_id=? AND duplicate=? AND albumtype=?)
                 AND album_id=?",
                &[composer, &album_id, &o_duplicate, &entry.albumtype, &album_id],
            );
            self.stats.lookups_deleted += n;
        }
    }

    fn album_lookups_insert(
        &mut self,
        new: &Image,
        duplicate: i64,
        entry: &AlbumEntry,
        lookup_albums: &[String],
        album_id: Option<i64>,
    ) {
        let album_id = album_id.map(Value::Integer).unwrap_or(Value::Null);

        for album in lookup_albums {
            for genre in &new.genre.list {
                for artist in &new.artist.list {
                    let exists = self.lookup_exists(
                        "SELECT 1 FROM GenreArtist WHERE genre=? AND artist=?",
                        &[genre, artist],
                    );
                    if !exists {
                        log_action("INSERT GenreArtist", artist);
                        let n = self.exec(
                            "inserting artist lookup details",
                            "INSERT INTO GenreArtist VALUES (?,?,?,?)",
                            &[genre, artist, &"", &""],
                        );
                        self.stats.lookups_inserted += n;
                    }
                    let exists = self.lookup_exists(
                        "SELECT 1 FROM GenreArtistAlbum
                         WHERE album_id=? AND genre=? AND artist=? AND album=? AND duplicate=? AND albumtype=? AND artistsort=?",
                        &[&album_id, genre, artist, album, &duplicate, &entry.albumtype, &new.artistsort],
                    );
                    if !exists {
                        log_action("INSERT GenreArtistAlbum", artist);
                        let n = self.exec(
                            "inserting artist lookup details",
                            "INSERT INTO GenreArtistAlbum VALUES (?,?,?,?,?,?,?,?,?)",
                            &[&album_id, genre, artist, album, &duplicate, &entry.albumtype, &new.artistsort, &"", &""],
                        );
                        self.stats.lookups_inserted += n;
                    }
                }
                for albumartist in &new.albumartist.list {
                    let exists = self.lookup_exists(
                        "SELECT 1 FROM GenreAlbumartist WHERE genre=? AND albumartist=?",
                        &[genre, albumartist],
                    );
                    if !exists {
                        log_action("INSERT GenreAlbumartist", albumartist);
                        let n = self.exec(
                            "inserting artist lookup details",
                            "INSERT INTO GenreAlbumartist VALUES (?,?,?,?)",
                            &[genre, albumartist, &"", &""],
                        );
                        self.stats.lookups_inserted += n;
                    }
                    let exists = self.lookup_exists(
                        "SELECT 1 FROM GenreAlbumartistAlbum
                         WHERE album_id=? AND genre=? AND albumartist=? AND album=? AND duplicate=? AND albumtype=? AND albumartistsort=?",
                        &[&album_id, genre, albumartist, album, &duplicate, &entry.albumtype, &new.albumartistsort],
                    );
                    if !exists {
                        log_action("INSERT GenreAlbumartistAlbum", albumartist);
                        let n = self.exec(
                            "inserting artist lookup details",
                            "INSERT INTO GenreAlbumartistAlbum VALUES (?,?,?,?,?,?,?,?,?)",
                            &[&album_id, genre, albumartist, album, &duplicate, &entry.albumtype, &new.albumartistsort, &"", &""],
                        );
                        self.stats.lookups_inserted += n;
                    }
                }
            }
            for artist in &new.artist.list {
                let exists = self.lookup_exists(
                    "SELECT 1 FROM ArtistAlbum
                     WHERE album_id=? AND artist=? AND album=? AND duplicate=? AND albumtype=? AND artistsort=?",
                    &[&album_id, artist, album, &duplicate, &entry.albumtype, &new.artistsort],
                );
                if !exists {
                    log_action("INSERT ArtistAlbum", artist);
                    let n = self.exec(
                        "inserting artist lookup details",
                        "INSERT INTO ArtistAlbum VALUES (?,?,?,?,?,?,?,?)",
                        &[&album_id, artist, album, &duplicate, &entry.albumtype, &new.artistsort, &"", &""],
                    );
                    self.stats.lookups_inserted += n;
                }
            }
            for albumartist in &new.albumartist.list {
                let exists = self.lookup_exists(
                    "SELECT 1 FROM AlbumartistAlbum
                     WHERE album_id=? AND albumartist=? AND album=? AND duplicate=? AND albumtype=? AND albumartistsort=?",
                    &[&album_id, albumartist, album, &duplicate, &entry.albumtype, &new.albumartistsort],
                );
                if !exists {
                    log_action("INSERT AlbumartistAlbum", albumartist);
                    let n = self.exec(
                        "inserting artist lookup details",
                        "INSERT INTO AlbumartistAlbum VALUES (?,?,?,?,?,?,?,?)",
                        &[&album_id, albumartist, album, &duplicate, &entry.albumtype, &new.albumartistsort, &"", &""],
                    );
                    self.stats.lookups_inserted += n;
                }
            }
            for composer in &new.composer.list {
                let exists = self.lookup_exists(
                    "SELECT 1 FROM ComposerAlbum
                     WHERE album_id=? AND composer=? AND album=? AND duplicate=? AND albumtype=? AND composersort=?",
                    &[&album_id, composer, album, &duplicate, &entry.albumtype, &new.composersort],
                );
                if !exists {
                    log_action("INSERT ComposerAlbum", composer);
                    let n = self.exec(
                        "inserting artist lookup details",
                        "INSERT INTO ComposerAlbum VALUES (?,?,?,?,?,?,?,?)",
                        &[&album_id, composer, album, &duplicate, &entry.albumtype, &new.composersort, &"", &""],
                    );
                    self.stats.lookups_inserted += n;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Entity tables
    // ------------------------------------------------------------------

    /// Maintain the name-keyed Artist/Albumartist/Composer/Genre tables.
    /// An update whose filtered value string is unchanged touches nothing;
    /// a changed one is processed as delete then insert. Deletes are
    /// guarded on the corresponding bridge table still referencing the
    /// name.
    fn process_entities(&mut self, updatetype: UpdateType, old: &Image, new: &Image) {
        let artist_change =
            updatetype == UpdateType::Update && old.artist.filtered != new.artist.filtered;
        if updatetype == UpdateType::Delete || artist_change {
            for artist in &old.artist.list {
                log_action("DELETE ARTIST", &artist);
                let n = self.exec(
                    "deleting artist details",
                    "DELETE FROM Artist WHERE NOT EXISTS
                        (SELECT 1 FROM ArtistAlbumTrack WHERE artist=?)
                     AND artist=?",
                    &[&artist, &artist],
                );
                self.stats.entities_deleted += n;
            }
        }
        if updatetype == UpdateType::Insert || artist_change {
            for artist in &new.artist.list {
                let exists =
                    self.lookup_exists("SELECT artist FROM Artist WHERE artist=?", &[&artist]);
                if !exists {
                    log_action("INSERT ARTIST", &artist);
                    let n = self.exec(
                        "inserting artist details",
                        "INSERT INTO Artist VALUES (?,?,?,?)",
                        &[&Value::Null, &artist, &"", &""],
                    );
                    self.stats.entities_inserted += n;
                }
            }
        }

        let albumartist_change = updatetype == UpdateType::Update
            && old.albumartist.filtered != new.albumartist.filtered;
        if updatetype == UpdateType::Delete || albumartist_change {
            for albumartist in &old.albumartist.list {
                log_action("DELETE ALBUMARTIST", &albumartist);
                let n = self.exec(
                    "deleting albumartist details",
                    "DELETE FROM Albumartist WHERE NOT EXISTS
                        (SELECT 1 FROM AlbumartistAlbumTrack WHERE albumartist=?)
                     AND albumartist=?",
                    &[&albumartist, &albumartist],
                );
                self.stats.entities_deleted += n;
            }
        }
        if updatetype == UpdateType::Insert || albumartist_change {
            for albumartist in &new.albumartist.list {
                let exists = self.lookup_exists(
                    "SELECT albumartist FROM Albumartist WHERE albumartist=?",
                    &[&albumartist],
                );
                if !exists {
                    log_action("INSERT ALBUMARTIST", &albumartist);
                    let n = self.exec(
                        "inserting albumartist details",
                        "INSERT INTO Albumartist VALUES (?,?,?,?)",
                        &[&Value::Null, &albumartist, &"", &""],
                    );
                    self.stats.entities_inserted += n;
                }
            }
        }

        let composer_change =
            updatetype == UpdateType::Update && old.composer.filtered != new.composer.filtered;
        if updatetype == UpdateType::Delete || composer_change {
            for composer in &old.composer.list {
                log_action("DELETE COMPOSER", &composer);
                let n = self.exec(
                    "deleting composer details",
                    "DELETE FROM Composer WHERE NOT EXISTS
                        (SELECT 1 FROM ComposerAlbumTrack WHERE composer=?)
                     AND composer=?",
                    &[&composer, &composer],
                );
                self.stats.entities_deleted += n;
            }
        }
        if updatetype == UpdateType::Insert || composer_change {
            for composer in &new.composer.list {
                let exists = self.lookup_exists(
                    "SELECT composer FROM Composer WHERE composer=?",
                    &[&composer],
                );
                if !exists {
                    log_action("INSERT COMPOSER", &composer);
                    let n = self.exec(
                        "inserting composer details",
                        "INSERT INTO Composer VALUES (?,?,?,?)",
                        &[&Value::Null, &composer, &"", &""],
                    );
                    self.stats.entities_inserted += n;
                }
            }
        }

        let genre_change =
            updatetype == UpdateType::Update && old.genre.filtered != new.genre.filtered;
        if updatetype == UpdateType::Delete || genre_change {
            for genre in &old.genre.list {
                log_action("DELETE GENRE", &genre);
                // genres hang off both the artist and albumartist browse
                // axes, so the guard covers both track lookups
                let n = self.exec(
                    "deleting genre details",
                    "DELETE FROM Genre WHERE NOT EXISTS (
                        SELECT 1 FROM GenreArtistAlbumTrack WHERE genre=?
                        UNION ALL
                        SELECT 1 FROM GenreAlbumartistAlbumTrack WHERE genre=?
                     ) AND Genre=?",
                    &[&genre, &genre, &genre],
                );
                self.stats.entities_deleted += n;
            }
        }
        if updatetype == UpdateType::Insert || genre_change {
            for genre in &new.genre.list {
                let exists =
                    self.lookup_exists("SELECT genre FROM Genre WHERE genre=?", &[&genre]);
                if !exists {
                    log_action("INSERT GENRE", &genre);
                    let n = self.exec(
                        "inserting genre details",
                        "INSERT INTO Genre VALUES (?,?,?,?)",
                        &[&Value::Null, &genre, &"", &""],
                    );
                    self.stats.entities_inserted += n;
                }
            }
        }
    }

    /// Finish the batch: roll up albumsonly and refresh playlist rowids.
    pub fn finish_batch(&mut self) {
        let entries = std::mem::take(&mut self.albumsonly);
        albumsonly::process(self.conn, self.cfg, &entries, self.stats);

        // post process playlist records to update track_rowid with rowid
        // from the tracks table (the playlists table belongs to the
        // scanner and may not exist in a standalone target)
        let has_playlists = self
            .conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='playlists'",
                [],
                |row| row.get::<_, i64>(0),
            )
            .unwrap_or(0)
            != 0;
        if has_playlists {
            self.exec(
                "updating playlist ids",
                "UPDATE playlists SET track_rowid =
                    (SELECT rowid FROM tracks WHERE tracks.id = playlists.track_id)",
                &[],
            );
        }
    }
}

/// One attempt at inserting a track row; a constraint violation on the
/// (title, album, artist, tracknumber) index surfaces as the Err case.
fn attempt_track_insert(
    conn: &Connection,
    new: &Image,
    title: &str,
    duplicate: i64,
) -> rusqlite::Result<usize> {
    let params: [&dyn ToSql; 38] = [
        &new.id,
        &new.id2,
        &duplicate,
        &title,
        &new.artist.filtered,
        &new.artist.full,
        &new.album.full,
        &new.genre.full,
        &new.tracknumber,
        &new.year,
        &new.albumartist.filtered,
        &new.albumartist.full,
        &new.composer.filtered,
        &new.composer.full,
        &new.codec,
        &new.length,
        &new.size,
        &new.created,
        &new.path,
        &new.filename,
        &new.discnumber,
        &new.comment,
        &new.folderart,
        &new.trackart,
        &new.bitrate,
        &new.samplerate,
        &new.bitspersample,
        &new.channels,
        &new.mime,
        &new.lastmodified,
        &new.folderartid,
        &new.trackartid,
        &new.inserted,
        &"",
        &"",
        &new.lastscanned,
        &new.titlesort,
        &new.albumsort,
    ];
    conn.prepare_cached(
        "INSERT INTO tracks VALUES \
         (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
    )
    .and_then(|mut stmt| stmt.execute(params.as_slice()))
}

/// Choose the album cover for a new image: an explicit work/virtual cover
/// wins, then folder art if preferred, then track art.
fn choose_cover(new: &Image, prefer_folderart: bool) -> (String, Value) {
    if !new.coverart.is_empty() {
        (
            new.coverart.clone(),
            Value::Text(new.coverartid.clone()),
        )
    } else if !new.folderart.is_empty() && prefer_folderart {
        (
            new.folderart.clone(),
            match new.folderartid {
                SqlNum(Some(n)) => Value::Integer(n),
                SqlNum(None) => Value::Text(String::new()),
            },
        )
    } else if !new.trackart.is_empty() {
        (
            new.trackart.clone(),
            match new.trackartid {
                SqlNum(Some(n)) => Value::Integer(n),
                SqlNum(None) => Value::Text(String::new()),
            },
        )
    } else {
        (String::new(), Value::Text(String::new()))
    }
}

// ============================================================================
// Scan Processing
// ============================================================================

/// Process one scan batch inside a single transaction. Returns the highest
/// scan stamp seen, or zero when the batch carried none.
pub fn process_scan(
    target: &mut Connection,
    source: &Connection,
    tables: &SourceTables,
    cfg: &Config,
    scan_id: i64,
    regenerate: bool,
    stats: &mut SyncStats,
) -> Result<i64> {
    let scan_start = std::time::Instant::now();
    let pairs = scan::read_pairs(source, tables, scan_id, regenerate)?;

    let pb = create_progress_bar(pairs.len() as u64, &format!("Scan {}: processing tags", scan_id));
    let tx = target.transaction()?;
    let last_scan_stamp;
    {
        let mut sync = Synchronizer::new(&tx, cfg, stats);
        for (i, pair) in pairs.iter().enumerate() {
            sync.process_pair(pair);
            pb.inc(1);
            log_progress("TAGS", (i + 1) as u64, pairs.len() as u64, 1_000);
        }
        sync.finish_batch();
        last_scan_stamp = sync.last_scan_stamp;
    }
    tx.commit()?;
    pb.finish_with_message(format!("Scan {}: {} pairs processed", scan_id, pairs.len()));
    if !is_quiet() {
        eprintln!(
            "[SCAN] {} complete: {} pairs ({})",
            scan_id,
            pairs.len(),
            format_duration(scan_start.elapsed())
        );
    }
    stats.scans_processed += 1;
    Ok(last_scan_stamp)
}

/// After all scans: record the last scan stamp and id in params and
/// refresh the query planner statistics.
pub fn finalize_run(
    target: &Connection,
    last_scan_stamp: i64,
    last_scan_id: i64,
) -> Result<()> {
    if last_scan_stamp > 1 {
        log_action(
            "UPDATE PARAMS",
            &format!("({}, {})", last_scan_stamp, last_scan_id),
        );
        target.execute(
            "UPDATE params SET lastscanstamp=?, lastscanid=? WHERE key='1'",
            rusqlite::params![last_scan_stamp, last_scan_id],
        )?;
    }
    target.execute_batch("ANALYZE")?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncStats;
    use crate::normalize::adjust_year;
    use crate::schema::create_database;
    use crate::testutil::{
        create_source_schema, insert_tag_pair, insert_tags_row, insert_wv_pair, TagRow, WvRow,
    };

    const TABLES: SourceTables = SourceTables {
        tags_update: "tags_update",
        workvirtuals_update: "workvirtuals_update",
        tags: "tags",
    };

    fn setup() -> (Connection, Connection) {
        let target = Connection::open_in_memory().unwrap();
        create_database(&target).unwrap();
        let source = Connection::open_in_memory().unwrap();
        create_source_schema(&source);
        (target, source)
    }

    fn run_scan(target: &mut Connection, source: &Connection, cfg: &Config, scan_id: i64) {
        let mut stats = SyncStats::default();
        process_scan(target, source, &TABLES, cfg, scan_id, false, &mut stats).unwrap();
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |r| r.get(0)).unwrap()
    }

    fn track_a<'a>() -> TagRow<'a> {
        TagRow {
            id: "A",
            title: "T1",
            artist: "The Band",
            album: "Disc",
            tracknumber: "2",
            year: "2001",
            path: "/music",
            filename: "a.flac",
            lastscanned: "100",
            ..TagRow::default()
        }
    }

    fn track_b<'a>() -> TagRow<'a> {
        TagRow {
            id: "B",
            title: "T2",
            artist: "The Band",
            album: "Disc",
            tracknumber: "1",
            year: "1999",
            path: "/music",
            filename: "b.flac",
            lastscanned: "100",
            ..TagRow::default()
        }
    }

    #[test]
    fn test_fresh_insert_two_track_album() {
        let (mut target, source) = setup();
        let cfg = Config::default();
        source.execute("INSERT INTO scans VALUES (1, '/music')", []).unwrap();
        insert_tag_pair(&source, 1, "I", &TagRow::default(), &track_a());
        insert_tag_pair(&source, 1, "I", &TagRow::default(), &track_b());
        run_scan(&mut target, &source, &cfg, 1);

        // one album row keyed by the 'the'-processed artist
        let (artistlist, albumartistlist, tracknumbers, year, duplicate, albumtype): (
            String,
            String,
            String,
            i64,
            i64,
            i64,
        ) = target
            .query_row(
                "SELECT artistlist, albumartistlist, tracknumbers, year, duplicate, albumtype
                 FROM albums WHERE albumlist='Disc'",
                [],
                |r| {
                    Ok((
                        r.get(0)?,
                        r.get(1)?,
                        r.get(2)?,
                        r.get(3)?,
                        r.get(4)?,
                        r.get(5)?,
                    ))
                },
            )
            .unwrap();
        assert_eq!(artistlist, "Band");
        assert_eq!(albumartistlist, "Band");
        assert_eq!(tracknumbers, "1,2");
        assert_eq!(duplicate, 0);
        assert_eq!(albumtype, 10);
        // denormalized fields come from track B (lowest tracknumber)
        assert_eq!(year, adjust_year("1999", "x").unwrap());

        // track rows carry both the filtered and the full artist forms
        let (artist, artistfull): (String, String) = target
            .query_row(
                "SELECT artist, artistfull FROM tracks WHERE id='A'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(artist, "Band");
        assert_eq!(artistfull, "The Band");

        // entity and albumsonly rows follow
        assert_eq!(count(&target, "SELECT count(*) FROM Artist"), 1);
        assert_eq!(
            count(&target, "SELECT count(*) FROM albumsonly WHERE albumlist='Disc'"),
            1
        );
    }

    #[test]
    fn test_title_collision_disambiguation() {
        let (mut target, source) = setup();
        let cfg = Config::default();
        source.execute("INSERT INTO scans VALUES (1, '/music')", []).unwrap();
        insert_tag_pair(&source, 1, "I", &TagRow::default(), &track_a());
        insert_tag_pair(
            &source,
            1,
            "I",
            &TagRow::default(),
            &TagRow {
                id: "A2",
                filename: "a2.flac",
                ..track_a()
            },
        );
        run_scan(&mut target, &source, &cfg, 1);

        let (title, duplicate): (String, i64) = target
            .query_row(
                "SELECT title, duplicate FROM tracks WHERE id='A2'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(title, "T1 (2)");
        assert_eq!(duplicate, 2);
        // the first occurrence stays untouched
        let (title, duplicate): (String, i64) = target
            .query_row("SELECT title, duplicate FROM tracks WHERE id='A'", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(title, "T1");
        assert_eq!(duplicate, 0);
        // the disambiguated track gets its own album row
        assert_eq!(
            count(&target, "SELECT count(*) FROM albums WHERE duplicate=2"),
            1
        );
    }

    #[test]
    fn test_delete_of_metadata_source_track_reselects() {
        let (mut target, source) = setup();
        let cfg = Config::default();
        source.execute("INSERT INTO scans VALUES (1, '/music')", []).unwrap();
        insert_tag_pair(&source, 1, "I", &TagRow::default(), &track_a());
        insert_tag_pair(&source, 1, "I", &TagRow::default(), &track_b());
        run_scan(&mut target, &source, &cfg, 1);

        // delete track B, the current metadata source
        source.execute("INSERT INTO scans VALUES (2, '/music')", []).unwrap();
        insert_tag_pair(
            &source,
            2,
            "D",
            &track_b(),
            &TagRow {
                id: "B",
                ..TagRow::default()
            },
        );
        run_scan(&mut target, &source, &cfg, 2);

        assert_eq!(count(&target, "SELECT count(*) FROM tracks"), 1);
        let (tracknumbers, year): (String, i64) = target
            .query_row(
                "SELECT tracknumbers, year FROM albums WHERE albumlist='Disc'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(tracknumbers, "2");
        // fields reselected from track A
        assert_eq!(year, adjust_year("2001", "x").unwrap());
    }

    #[test]
    fn test_multivalued_genre_fanout() {
        let (mut target, source) = setup();
        let cfg = Config::default();
        source.execute("INSERT INTO scans VALUES (1, '/music')", []).unwrap();
        insert_tag_pair(
            &source,
            1,
            "I",
            &TagRow::default(),
            &TagRow {
                id: "G",
                title: "Song",
                artist: "X",
                album: "D1",
                genre: "Rock\nPop",
                tracknumber: "1",
                path: "/music",
                filename: "g.flac",
                ..TagRow::default()
            },
        );
        run_scan(&mut target, &source, &cfg, 1);

        assert_eq!(
            count(&target, "SELECT count(*) FROM GenreArtistAlbumTrack WHERE artist='X'"),
            2
        );
        assert_eq!(
            count(
                &target,
                "SELECT count(*) FROM GenreArtistAlbumTrack WHERE genre='Rock'"
            ),
            1
        );
        assert_eq!(count(&target, "SELECT count(*) FROM GenreArtist"), 2);
        assert_eq!(count(&target, "SELECT count(*) FROM Genre"), 2);
    }

    #[test]
    fn test_virtual_album_composition() {
        let (mut target, source) = setup();
        let dir = tempfile::tempdir().unwrap();
        let ini = dir.path().join("scan.ini");
        std::fs::write(
            &ini,
            "[virtual name format]\nALBUM_V = \"%s - %s\" % (virtual, artist)\n",
        )
        .unwrap();
        let cfg = Config::load(&ini, None).unwrap();

        source.execute("INSERT INTO scans VALUES (1, '/music')", []).unwrap();
        let track = TagRow {
            id: "TX",
            title: "Song",
            artist: "X",
            album: "RealAlbum",
            tracknumber: "1",
            path: "/music",
            filename: "tx.flac",
            ..TagRow::default()
        };
        insert_tag_pair(&source, 1, "I", &TagRow::default(), &track);
        insert_tags_row(&source, &track);
        insert_wv_pair(
            &source,
            1,
            "I",
            &WvRow::default(),
            &WvRow {
                id: "TX",
                title: "Best Of",
                artist: "X",
                track: "1",
                wvtype: "virtual",
                ..WvRow::default()
            },
        );
        run_scan(&mut target, &source, &cfg, 1);

        // the user structure composes virtual and artist, numbered 101
        let (albumtype, tracknumbers): (i64, String) = target
            .query_row(
                "SELECT albumtype, tracknumbers FROM albums WHERE albumlist='Best Of - X'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(albumtype, 101);
        assert_eq!(tracknumbers, "1");
        // the default virtual structure is there too
        assert_eq!(
            count(
                &target,
                "SELECT count(*) FROM albums WHERE albumlist='Best Of' AND albumtype=100"
            ),
            1
        );
        // the per-virtual track enumeration carries the real album name
        let (album, tracknumber): (String, i64) = target
            .query_row(
                "SELECT album, tracknumber FROM TrackNumbers WHERE dummyalbum='Best Of - X'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(album, "RealAlbum");
        assert_eq!(tracknumber, 1);
    }

    #[test]
    fn test_insert_batch_is_idempotent() {
        let (mut target, source) = setup();
        let cfg = Config::default();
        source.execute("INSERT INTO scans VALUES (1, '/music')", []).unwrap();
        insert_tag_pair(&source, 1, "I", &TagRow::default(), &track_a());
        insert_tag_pair(&source, 1, "I", &TagRow::default(), &track_b());

        run_scan(&mut target, &source, &cfg, 1);
        // the batch is still in the source: apply it again
        run_scan(&mut target, &source, &cfg, 1);

        assert_eq!(count(&target, "SELECT count(*) FROM tracks"), 2);
        assert_eq!(count(&target, "SELECT count(*) FROM albums"), 1);
        let tracknumbers: String = target
            .query_row("SELECT tracknumbers FROM albums", [], |r| r.get(0))
            .unwrap();
        assert_eq!(tracknumbers, "1,2");
        assert_eq!(count(&target, "SELECT count(*) FROM ArtistAlbumTrack"), 2);
        assert_eq!(count(&target, "SELECT count(*) FROM Artist"), 1);
    }

    #[test]
    fn test_insert_then_delete_returns_to_initial_state() {
        let (mut target, source) = setup();
        let cfg = Config::default();
        source.execute("INSERT INTO scans VALUES (1, '/music')", []).unwrap();
        insert_tag_pair(&source, 1, "I", &TagRow::default(), &track_a());
        insert_tag_pair(&source, 1, "I", &TagRow::default(), &track_b());
        run_scan(&mut target, &source, &cfg, 1);

        source.execute("INSERT INTO scans VALUES (2, '/music')", []).unwrap();
        insert_tag_pair(&source, 2, "D", &track_a(), &TagRow { id: "A", ..TagRow::default() });
        insert_tag_pair(&source, 2, "D", &track_b(), &TagRow { id: "B", ..TagRow::default() });
        run_scan(&mut target, &source, &cfg, 2);

        for table in [
            "tracks",
            "albums",
            "albumsonly",
            "Artist",
            "Albumartist",
            "ArtistAlbumTrack",
            "AlbumartistAlbumTrack",
            "ArtistAlbum",
            "AlbumartistAlbum",
            "ArtistAlbumsonly",
            "AlbumartistAlbumsonly",
        ] {
            assert_eq!(
                count(&target, &format!("SELECT count(*) FROM {}", table)),
                0,
                "table {} should be empty",
                table
            );
        }
    }

    #[test]
    fn test_update_renames_artist_entities() {
        let (mut target, source) = setup();
        let cfg = Config::default();
        source.execute("INSERT INTO scans VALUES (1, '/music')", []).unwrap();
        insert_tag_pair(&source, 1, "I", &TagRow::default(), &track_a());
        run_scan(&mut target, &source, &cfg, 1);

        source.execute("INSERT INTO scans VALUES (2, '/music')", []).unwrap();
        insert_tag_pair(
            &source,
            2,
            "U",
            &track_a(),
            &TagRow {
                artist: "Solo",
                ..track_a()
            },
        );
        run_scan(&mut target, &source, &cfg, 2);

        let artist: String = target
            .query_row("SELECT artist FROM tracks WHERE id='A'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(artist, "Solo");
        assert_eq!(
            count(&target, "SELECT count(*) FROM Artist WHERE artist='Solo'"),
            1
        );
        assert_eq!(
            count(&target, "SELECT count(*) FROM Artist WHERE artist='Band'"),
            0
        );
        let artistlist: String = target
            .query_row("SELECT artistlist FROM albums WHERE albumlist='Disc'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(artistlist, "Solo");
    }

    #[test]
    fn test_update_keeps_duplicate_suffix() {
        let (mut target, source) = setup();
        let cfg = Config::default();
        source.execute("INSERT INTO scans VALUES (1, '/music')", []).unwrap();
        insert_tag_pair(&source, 1, "I", &TagRow::default(), &track_a());
        insert_tag_pair(
            &source,
            1,
            "I",
            &TagRow::default(),
            &TagRow {
                id: "A2",
                filename: "a2.flac",
                ..track_a()
            },
        );
        run_scan(&mut target, &source, &cfg, 1);

        // update the disambiguated track: the incoming title is plain but
        // the " (2)" suffix must survive
        source.execute("INSERT INTO scans VALUES (2, '/music')", []).unwrap();
        insert_tag_pair(
            &source,
            2,
            "U",
            &TagRow {
                id: "A2",
                filename: "a2.flac",
                ..track_a()
            },
            &TagRow {
                id: "A2",
                filename: "a2.flac",
                year: "2005",
                ..track_a()
            },
        );
        run_scan(&mut target, &source, &cfg, 2);

        let title: String = target
            .query_row("SELECT title FROM tracks WHERE id='A2'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(title, "T1 (2)");
        // the album's tracknumber list is not doubled by the update
        let tracknumbers: String = target
            .query_row(
                "SELECT tracknumbers FROM albums WHERE duplicate=2",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(tracknumbers, "2");
    }
}
