//! Source database fixtures shared by the database-level tests.
//!
//! Builds the scanner-side tables (`scans`, `tags`, `tags_update`,
//! `workvirtuals_update`) and inserts before/after row pairs the way the
//! upstream scanner writes them.

use rusqlite::Connection;

/// Create the scanner-side source tables.
pub fn create_source_schema(conn: &Connection) {
    conn.execute_batch(
        "CREATE TABLE scans (id integer, scanpath text);
         CREATE TABLE tags (id text, id2 text, title text, artist text,
                            album text, genre text, tracknumber text,
                            year text, albumartist text, composer text,
                            codec text, length text, size text, created text,
                            path text, filename text, discnumber text,
                            comment text, folderart text, trackart text,
                            bitrate text, samplerate text, bitspersample text,
                            channels text, mime text, lastmodified text,
                            folderartid text, trackartid text, inserted text,
                            lastscanned text, titlesort text, albumsort text,
                            artistsort text, albumartistsort text,
                            composersort text);
         CREATE TABLE tags_update (id text, id2 text, title text, artist text,
                            album text, genre text, tracknumber text,
                            year text, albumartist text, composer text,
                            codec text, length text, size text, created text,
                            path text, filename text, discnumber text,
                            comment text, folderart text, trackart text,
                            bitrate text, samplerate text, bitspersample text,
                            channels text, mime text, lastmodified text,
                            scannumber integer, folderartid text,
                            trackartid text, inserted text, lastscanned text,
                            titlesort text, albumsort text, artistsort text,
                            albumartistsort text, composersort text,
                            updateorder integer, updatetype text);
         CREATE TABLE workvirtuals_update (id text, wvfile text, plfile text,
                            title text, artist text, albumartist text,
                            composer text, genre text, track text, year text,
                            discnumber text, type text, occurs integer,
                            cover text, coverartid text, created text,
                            lastmodified text, inserted text,
                            lastscanned text, titlesort text, albumsort text,
                            artistsort text, albumartistsort text,
                            composersort text, updateorder integer,
                            updatetype text, scannumber integer);",
    )
    .unwrap();
}

/// One tag row image for fixtures; unset fields stay blank.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagRow<'a> {
    pub id: &'a str,
    pub id2: &'a str,
    pub title: &'a str,
    pub artist: &'a str,
    pub album: &'a str,
    pub genre: &'a str,
    pub tracknumber: &'a str,
    pub year: &'a str,
    pub albumartist: &'a str,
    pub composer: &'a str,
    pub codec: &'a str,
    pub length: &'a str,
    pub size: &'a str,
    pub created: &'a str,
    pub path: &'a str,
    pub filename: &'a str,
    pub discnumber: &'a str,
    pub comment: &'a str,
    pub folderart: &'a str,
    pub trackart: &'a str,
    pub bitrate: &'a str,
    pub samplerate: &'a str,
    pub bitspersample: &'a str,
    pub channels: &'a str,
    pub mime: &'a str,
    pub lastmodified: &'a str,
    pub folderartid: &'a str,
    pub trackartid: &'a str,
    pub inserted: &'a str,
    pub lastscanned: &'a str,
    pub titlesort: &'a str,
    pub albumsort: &'a str,
    pub artistsort: &'a str,
    pub albumartistsort: &'a str,
    pub composersort: &'a str,
}

fn insert_tag_image(
    conn: &Connection,
    scannumber: i64,
    updatetype: &str,
    updateorder: i64,
    pair_id: &str,
    row: &TagRow,
) {
    conn.execute(
        "INSERT INTO tags_update (id, id2, title, artist, album, genre,
            tracknumber, year, albumartist, composer, codec, length, size,
            created, path, filename, discnumber, comment, folderart,
            trackart, bitrate, samplerate, bitspersample, channels, mime,
            lastmodified, scannumber, folderartid, trackartid, inserted,
            lastscanned, titlesort, albumsort, artistsort, albumartistsort,
            composersort, updateorder, updatetype)
         VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
        rusqlite::params![
            pair_id,
            row.id2,
            row.title,
            row.artist,
            row.album,
            row.genre,
            row.tracknumber,
            row.year,
            row.albumartist,
            row.composer,
            row.codec,
            row.length,
            row.size,
            row.created,
            row.path,
            row.filename,
            row.discnumber,
            row.comment,
            row.folderart,
            row.trackart,
            row.bitrate,
            row.samplerate,
            row.bitspersample,
            row.channels,
            row.mime,
            row.lastmodified,
            scannumber,
            row.folderartid,
            row.trackartid,
            row.inserted,
            row.lastscanned,
            row.titlesort,
            row.albumsort,
            row.artistsort,
            row.albumartistsort,
            row.composersort,
            updateorder,
            updatetype,
        ],
    )
    .unwrap();
}

/// Insert a before/after pair into tags_update. The pair id is taken from
/// whichever image carries one.
pub fn insert_tag_pair(
    conn: &Connection,
    scannumber: i64,
    updatetype: &str,
    old: &TagRow,
    new: &TagRow,
) {
    let pair_id = if new.id.is_empty() { old.id } else { new.id };
    insert_tag_image(conn, scannumber, updatetype, 0, pair_id, old);
    insert_tag_image(conn, scannumber, updatetype, 1, pair_id, new);
}

/// Insert the after-image of a track into the live tags table (the join
/// source for work/virtual rows).
pub fn insert_tags_row(conn: &Connection, row: &TagRow) {
    conn.execute(
        "INSERT INTO tags (id, id2, title, artist, album, genre, tracknumber,
            year, albumartist, composer, codec, length, size, created, path,
            filename, discnumber, comment, folderart, trackart, bitrate,
            samplerate, bitspersample, channels, mime, lastmodified,
            folderartid, trackartid, inserted, lastscanned, titlesort,
            albumsort, artistsort, albumartistsort, composersort)
         VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
        rusqlite::params![
            row.id,
            row.id2,
            row.title,
            row.artist,
            row.album,
            row.genre,
            row.tracknumber,
            row.year,
            row.albumartist,
            row.composer,
            row.codec,
            row.length,
            row.size,
            row.created,
            row.path,
            row.filename,
            row.discnumber,
            row.comment,
            row.folderart,
            row.trackart,
            row.bitrate,
            row.samplerate,
            row.bitspersample,
            row.channels,
            row.mime,
            row.lastmodified,
            row.folderartid,
            row.trackartid,
            row.inserted,
            row.lastscanned,
            row.titlesort,
            row.albumsort,
            row.artistsort,
            row.albumartistsort,
            row.composersort,
        ],
    )
    .unwrap();
}

/// One work/virtual row image for fixtures.
#[derive(Debug, Clone, Copy, Default)]
pub struct WvRow<'a> {
    pub id: &'a str,
    pub wvfile: &'a str,
    pub plfile: &'a str,
    pub title: &'a str,
    pub artist: &'a str,
    pub albumartist: &'a str,
    pub composer: &'a str,
    pub genre: &'a str,
    pub track: &'a str,
    pub year: &'a str,
    pub discnumber: &'a str,
    pub wvtype: &'a str,
    pub occurs: i64,
    pub cover: &'a str,
    pub coverartid: &'a str,
    pub created: &'a str,
    pub lastmodified: &'a str,
    pub inserted: &'a str,
    pub lastscanned: &'a str,
    pub titlesort: &'a str,
    pub albumsort: &'a str,
    pub artistsort: &'a str,
    pub albumartistsort: &'a str,
    pub composersort: &'a str,
}

fn insert_wv_image(
    conn: &Connection,
    scannumber: i64,
    updatetype: &str,
    updateorder: i64,
    pair_id: &str,
    row: &WvRow,
) {
    conn.execute(
        "INSERT INTO workvirtuals_update (id, wvfile, plfile, title, artist,
            albumartist, composer, genre, track, year, discnumber, type,
            occurs, cover, coverartid, created, lastmodified, inserted,
            lastscanned, titlesort, albumsort, artistsort, albumartistsort,
            composersort, updateorder, updatetype, scannumber)
         VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
        rusqlite::params![
            pair_id,
            row.wvfile,
            row.plfile,
            row.title,
            row.artist,
            row.albumartist,
            row.composer,
            row.genre,
            row.track,
            row.year,
            row.discnumber,
            row.wvtype,
            row.occurs,
            row.cover,
            row.coverartid,
            row.created,
            row.lastmodified,
            row.inserted,
            row.lastscanned,
            row.titlesort,
            row.albumsort,
            row.artistsort,
            row.albumartistsort,
            row.composersort,
            updateorder,
            updatetype,
            scannumber,
        ],
    )
    .unwrap();
}

/// Insert a before/after pair into workvirtuals_update.
pub fn insert_wv_pair(
    conn: &Connection,
    scannumber: i64,
    updatetype: &str,
    old: &WvRow,
    new: &WvRow,
) {
    let pair_id = if new.id.is_empty() { old.id } else { new.id };
    insert_wv_image(conn, scannumber, updatetype, 0, pair_id, old);
    insert_wv_image(conn, scannumber, updatetype, 1, pair_id, new);
}
