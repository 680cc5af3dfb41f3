//! Target database schema management.
//!
//! Creates the browse tables and their indexes when absent, seeds the
//! autoincrement bands, and drops everything for a regenerate run. Entity
//! kind is inferable from an id alone because each autoincrementing table
//! is seeded at its own numeric band start (insert-then-delete of a row at
//! the band origin).

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::progress::log_action;

/// Autoincrement band origins.
pub const ARTIST_BAND: i64 = 100_000_000;
pub const ALBUMARTIST_BAND: i64 = 200_000_000;
pub const ALBUM_BAND: i64 = 300_000_000;
pub const ALBUMSONLY_BAND: i64 = 350_000_000;
pub const COMPOSER_BAND: i64 = 400_000_000;
pub const GENRE_BAND: i64 = 500_000_000;

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type='table' AND name=?",
        [name],
        |row| row.get(0),
    )?;
    Ok(count != 0)
}

/// Create the target tables and indexes that don't exist yet.
pub fn create_database(conn: &Connection) -> Result<()> {
    if !table_exists(conn, "params")? {
        conn.execute_batch(
            "CREATE TABLE params (key text,
                                  lastmodified integer,
                                  lastscanstamp integer,
                                  lastscanid integer,
                                  use_albumartist text,
                                  show_duplicates text,
                                  album_identification text);
             INSERT INTO params VALUES ('1', 0, 0, ' ', '', '', '');",
        )
        .context("creating params")?;
    }

    if !table_exists(conn, "wvlookup")? {
        conn.execute_batch(
            "CREATE TABLE wvlookup (wvtype text,
                                    wvnumber integer);",
        )
        .context("creating wvlookup")?;
    }

    if !table_exists(conn, "tracks")? {
        conn.execute_batch(
            "CREATE TABLE tracks (id text,
                                  id2 text,
                                  duplicate integer,
                                  title text COLLATE NOCASE,
                                  artist text COLLATE NOCASE,
                                  artistfull text COLLATE NOCASE,
                                  album text COLLATE NOCASE,
                                  genre text COLLATE NOCASE,
                                  tracknumber integer,
                                  year integer,
                                  albumartist text COLLATE NOCASE,
                                  albumartistfull text COLLATE NOCASE,
                                  composer text COLLATE NOCASE,
                                  composerfull text COLLATE NOCASE,
                                  codec text,
                                  length integer,
                                  size integer,
                                  created integer,
                                  path text,
                                  filename text,
                                  discnumber integer,
                                  comment text,
                                  folderart text,
                                  trackart text,
                                  bitrate integer,
                                  samplerate integer,
                                  bitspersample integer,
                                  channels integer,
                                  mime text,
                                  lastmodified integer,
                                  folderartid integer,
                                  trackartid integer,
                                  inserted integer,
                                  lastplayed integer,
                                  playcount integer,
                                  lastscanned integer,
                                  titlesort text COLLATE NOCASE,
                                  albumsort text COLLATE NOCASE);
             CREATE UNIQUE INDEX inxTracks ON tracks (title, album, artist, tracknumber);
             CREATE UNIQUE INDEX inxTrackId ON tracks (id);
             CREATE INDEX inxTrackId2 ON tracks (id2);
             CREATE INDEX inxTrackDuplicates ON tracks (duplicate);
             CREATE INDEX inxTrackTitles ON tracks (title);
             CREATE INDEX inxTrackAlbums ON tracks (album);
             CREATE INDEX inxTrackAlbumDups ON tracks (album, duplicate);
             CREATE INDEX inxTrackAlbumDiscTrackTitles ON tracks (album, discnumber, tracknumber, title);
             CREATE INDEX inxTrackDiscTrackTitles ON tracks (discnumber, tracknumber, title);
             CREATE INDEX inxTrackArtists ON tracks (artist);
             CREATE INDEX inxTrackAlbumArtists ON tracks (albumartist);
             CREATE INDEX inxTrackComposers ON tracks (composer);
             CREATE INDEX inxTrackTitlesort ON tracks (titlesort);
             CREATE INDEX inxTrackYears ON tracks (year);
             CREATE INDEX inxTrackLastmodifieds ON tracks (lastmodified);
             CREATE INDEX inxTrackInserteds ON tracks (inserted);
             CREATE INDEX inxTrackTracknumber ON tracks (tracknumber);
             CREATE INDEX inxTrackLastplayeds ON tracks (lastplayed);
             CREATE INDEX inxTrackPlaycounts ON tracks (playcount);
             CREATE INDEX inxTrackPathFilename ON tracks (path, filename);
             CREATE INDEX inxTrackPlay ON tracks (title, album, artist, length);",
        )
        .context("creating tracks")?;
    }

    if !table_exists(conn, "albums")? {
        conn.execute_batch(&format!(
            "CREATE TABLE albums (id integer primary key autoincrement,
                                  albumlist text COLLATE NOCASE,
                                  artistlist text COLLATE NOCASE,
                                  year integer,
                                  albumartistlist text COLLATE NOCASE,
                                  duplicate integer,
                                  cover text,
                                  artid integer,
                                  inserted integer,
                                  composerlist text COLLATE NOCASE,
                                  tracknumbers text,
                                  created integer,
                                  lastmodified integer,
                                  albumtype integer,
                                  lastplayed integer,
                                  playcount integer,
                                  albumsort text COLLATE NOCASE);
             CREATE UNIQUE INDEX inxAlbums ON albums (albumlist, artistlist, albumartistlist, duplicate, albumtype);
             CREATE UNIQUE INDEX inxAlbumId ON albums (id);
             CREATE INDEX inxAlbumAlbums ON albums (albumlist);
             CREATE INDEX inxAlbumAlbumsort ON albums (albumsort);
             CREATE INDEX inxAlbumArtists2 ON albums (artistlist);
             CREATE INDEX inxAlbumAlbumartists ON albums (albumartistlist);
             CREATE INDEX inxAlbumComposers ON albums (composerlist);
             CREATE INDEX inxAlbumYears ON albums (year);
             CREATE INDEX inxAlbumInserteds ON albums (inserted);
             CREATE INDEX inxAlbumcreateds ON albums (created);
             CREATE INDEX inxAlbumlastmodifieds ON albums (lastmodified);
             CREATE INDEX inxAlbumLastPlayeds ON albums (lastplayed);
             CREATE INDEX inxAlbumPlaycounts ON albums (playcount);
             CREATE INDEX inxAlbumAlbumtype ON albums (albumtype);
             CREATE INDEX inxAlbumTracknumbers ON albums (tracknumbers);
             CREATE INDEX inxAlbumTracknumbers2 ON albums (albumlist, tracknumbers, albumtype, duplicate);
             INSERT INTO albums VALUES ({id},'','','','','','','','','','','','','','','','');
             DELETE FROM albums WHERE id={id};",
            id = ALBUM_BAND
        ))
        .context("creating albums")?;
    }

    if !table_exists(conn, "albumsonly")? {
        conn.execute_batch(&format!(
            "CREATE TABLE albumsonly (id integer primary key autoincrement,
                                      albumlist text COLLATE NOCASE,
                                      artistlist text COLLATE NOCASE,
                                      year integer,
                                      albumartistlist text COLLATE NOCASE,
                                      duplicate integer,
                                      cover text,
                                      artid integer,
                                      inserted integer,
                                      composerlist text COLLATE NOCASE,
                                      tracknumbers text,
                                      created integer,
                                      lastmodified integer,
                                      albumtype integer,
                                      lastplayed integer,
                                      playcount integer,
                                      albumsort text COLLATE NOCASE,
                                      separated integer);
             CREATE UNIQUE INDEX inxAlbumsonly ON albumsonly (albumlist, artistlist, albumartistlist, duplicate, albumtype);
             CREATE UNIQUE INDEX inxAlbumsonlyId ON albumsonly (id);
             CREATE INDEX inxAlbumsonlyshort ON albumsonly (albumlist, duplicate, albumtype);
             INSERT INTO albumsonly VALUES ({id},'','','','','','','','','','','','','','','','','');
             DELETE FROM albumsonly WHERE id={id};",
            id = ALBUMSONLY_BAND
        ))
        .context("creating albumsonly")?;
    }

    // name-keyed entity tables, one per browse axis, each in its own band
    if !table_exists(conn, "Artist")? {
        conn.execute_batch(&format!(
            "CREATE TABLE Artist (id integer primary key autoincrement,
                                  artist text COLLATE NOCASE,
                                  lastplayed integer,
                                  playcount integer);
             CREATE UNIQUE INDEX inxArtists ON Artist (artist);
             CREATE INDEX inxArtistLastplayeds ON Artist (lastplayed);
             CREATE INDEX inxArtistPlaycounts ON Artist (playcount);
             INSERT INTO Artist VALUES ({id},'','','');
             DELETE FROM Artist WHERE id={id};",
            id = ARTIST_BAND
        ))
        .context("creating Artist")?;
    }

    if !table_exists(conn, "Albumartist")? {
        conn.execute_batch(&format!(
            "CREATE TABLE Albumartist (id integer primary key autoincrement,
                                       albumartist text COLLATE NOCASE,
                                       lastplayed integer,
                                       playcount integer);
             CREATE UNIQUE INDEX inxAlbumartists ON Albumartist (albumartist);
             CREATE INDEX inxAlbumartistLastplayeds ON Albumartist (lastplayed);
             CREATE INDEX inxAlbumartistPlaycounts ON Albumartist (playcount);
             INSERT INTO Albumartist VALUES ({id},'','','');
             DELETE FROM Albumartist WHERE id={id};",
            id = ALBUMARTIST_BAND
        ))
        .context("creating Albumartist")?;
    }

    if !table_exists(conn, "Composer")? {
        conn.execute_batch(&format!(
            "CREATE TABLE Composer (id integer primary key autoincrement,
                                    composer text COLLATE NOCASE,
                                    lastplayed integer,
                                    playcount integer);
             CREATE UNIQUE INDEX inxComposers ON Composer (composer);
             CREATE INDEX inxComposerLastplayeds ON Composer (lastplayed);
             CREATE INDEX inxComposerPlaycounts ON Composer (playcount);
             INSERT INTO Composer VALUES ({id},'','','');
             DELETE FROM Composer WHERE id={id};",
            id = COMPOSER_BAND
        ))
        .context("creating Composer")?;
    }

    if !table_exists(conn, "Genre")? {
        conn.execute_batch(&format!(
            "CREATE TABLE Genre (id integer primary key autoincrement,
                                 genre text COLLATE NOCASE,
                                 lastplayed integer,
                                 playcount integer);
             CREATE UNIQUE INDEX inxGenres ON Genre (genre);
             CREATE INDEX inxGenreLastplayeds ON Genre (lastplayed);
             CREATE INDEX inxGenrePlaycounts ON Genre (playcount);
             INSERT INTO Genre VALUES ({id},'','','');
             DELETE FROM Genre WHERE id={id};",
            id = GENRE_BAND
        ))
        .context("creating Genre")?;
    }

    // cross-product lookups at genre/artist level
    if !table_exists(conn, "GenreArtist")? {
        conn.execute_batch(
            "CREATE TABLE GenreArtist (genre text COLLATE NOCASE,
                                       artist text COLLATE NOCASE,
                                       lastplayed integer,
                                       playcount integer);
             CREATE UNIQUE INDEX inxGenreArtist ON GenreArtist (genre, artist);
             CREATE INDEX inxGenreArtistLastplayed ON GenreArtist (lastplayed);
             CREATE INDEX inxGenreArtistPlaycount ON GenreArtist (playcount);",
        )
        .context("creating GenreArtist")?;
    }

    if !table_exists(conn, "GenreAlbumartist")? {
        conn.execute_batch(
            "CREATE TABLE GenreAlbumartist (genre text COLLATE NOCASE,
                                            albumartist text COLLATE NOCASE,
                                            lastplayed integer,
                                            playcount integer);
             CREATE UNIQUE INDEX inxGenreAlbumartist ON GenreAlbumartist (genre, albumartist);
             CREATE INDEX inxGenreAlbumartistLastplayed ON GenreAlbumartist (lastplayed);
             CREATE INDEX inxGenreAlbumartistPlaycount ON GenreAlbumartist (playcount);",
        )
        .context("creating GenreAlbumartist")?;
    }

    // album-level lookups
    if !table_exists(conn, "GenreArtistAlbum")? {
        conn.execute_batch(
            "CREATE TABLE GenreArtistAlbum (album_id integer,
                                            genre text COLLATE NOCASE,
                                            artist text COLLATE NOCASE,
                                            album text COLLATE NOCASE,
                                            duplicate integer,
                                            albumtype integer,
                                            artistsort text COLLATE NOCASE,
                                            lastplayed integer,
                                            playcount integer);
             CREATE UNIQUE INDEX inxGenreArtistAlbum ON GenreArtistAlbum (album_id, genre, artist, album, duplicate, albumtype, artistsort);
             CREATE INDEX inxGenreArtistAlbumGenreArtist ON GenreArtistAlbum (genre, artist, album, albumtype);
             CREATE INDEX inxGenreArtistAlbumArtist ON GenreArtistAlbum (artist);
             CREATE INDEX inxGenreArtistAlbumArtistsort ON GenreArtistAlbum (artistsort);
             CREATE INDEX inxGenreArtistAlbumLastplayed ON GenreArtistAlbum (lastplayed);
             CREATE INDEX inxGenreArtistAlbumPlaycount ON GenreArtistAlbum (playcount);",
        )
        .context("creating GenreArtistAlbum")?;
    }

    if !table_exists(conn, "GenreAlbumartistAlbum")? {
        conn.execute_batch(
            "CREATE TABLE GenreAlbumartistAlbum (album_id integer,
                                                 genre text COLLATE NOCASE,
                                                 albumartist text COLLATE NOCASE,
                                                 album text COLLATE NOCASE,
                                                 duplicate integer,
                                                 albumtype integer,
                                                 albumartistsort text COLLATE NOCASE,
                                                 lastplayed integer,
                                                 playcount integer);
             CREATE UNIQUE INDEX inxGenreAlbumartistAlbum ON GenreAlbumartistAlbum (album_id, genre, albumartist, album, duplicate, albumtype, albumartistsort);
             CREATE INDEX inxGenreAlbumartistAlbumGenreAlbumartist ON GenreAlbumartistAlbum (genre, albumartist, album, albumtype);
             CREATE INDEX inxGenreAlbumartistAlbumAlbumartist ON GenreAlbumartistAlbum (albumartist);
             CREATE INDEX inxGenreAlbumartistAlbumAlbumartistsort ON GenreAlbumartistAlbum (albumartistsort);
             CREATE INDEX inxGenreAlbumartistAlbumLastplayed ON GenreAlbumartistAlbum (lastplayed);
             CREATE INDEX inxGenreAlbumartistAlbumPlaycount ON GenreAlbumartistAlbum (playcount);",
        )
        .context("creating GenreAlbumartistAlbum")?;
    }

    if !table_exists(conn, "ArtistAlbum")? {
        conn.execute_batch(
            "CREATE TABLE ArtistAlbum (album_id integer,
                                       artist text COLLATE NOCASE,
                                       album text COLLATE NOCASE,
                                       duplicate integer,
                                       albumtype integer,
                                       artistsort text COLLATE NOCASE,
                                       lastplayed integer,
                                       playcount integer);
             CREATE UNIQUE INDEX inxArtistAlbum ON ArtistAlbum (album_id, artist, album, duplicate, albumtype, artistsort);
             CREATE INDEX inxArtistAlbumArtist ON ArtistAlbum (artist);
             CREATE INDEX inxArtistAlbumArtistsort ON ArtistAlbum (artistsort);
             CREATE INDEX inxArtistAlbumArtistType ON ArtistAlbum (artist, albumtype);
             CREATE INDEX inxArtistAlbumLastplayed ON ArtistAlbum (lastplayed);
             CREATE INDEX inxArtistAlbumPlaycount ON ArtistAlbum (playcount);",
        )
        .context("creating ArtistAlbum")?;
    }

    if !table_exists(conn, "AlbumartistAlbum")? {
        conn.execute_batch(
            "CREATE TABLE AlbumartistAlbum (album_id integer,
                                            albumartist text COLLATE NOCASE,
                                            album text COLLATE NOCASE,
                                            duplicate integer,
                                            albumtype integer,
                                            albumartistsort text COLLATE NOCASE,
                                            lastplayed integer,
                                            playcount integer);
             CREATE UNIQUE INDEX inxAlbumartistAlbum ON AlbumartistAlbum (album_id, albumartist, album, duplicate, albumtype, albumartistsort);
             CREATE INDEX inxAlbumartistAlbumAlbumartist ON AlbumartistAlbum (albumartist);
             CREATE INDEX inxAlbumartistAlbumAlbumartistsort ON AlbumartistAlbum (albumartistsort);
             CREATE INDEX inxAlbumartistAlbumAlbumartistType ON AlbumartistAlbum (albumartist, albumtype);
             CREATE INDEX inxAlbumartistAlbumLastplayed ON AlbumartistAlbum (lastplayed);
             CREATE INDEX inxAlbumartistAlbumPlaycount ON AlbumartistAlbum (playcount);",
        )
        .context("creating AlbumartistAlbum")?;
    }

    if !table_exists(conn, "ComposerAlbum")? {
        conn.execute_batch(
            "CREATE TABLE ComposerAlbum (album_id integer,
                                         composer text COLLATE NOCASE,
                                         album text COLLATE NOCASE,
                                         duplicate integer,
                                         albumtype integer,
                                         composersort text COLLATE NOCASE,
                                         lastplayed integer,
                                         playcount integer);
             CREATE UNIQUE INDEX inxComposerAlbum ON ComposerAlbum (album_id, composer, album, duplicate, albumtype, composersort);
             CREATE INDEX inxComposerAlbumComposer ON ComposerAlbum (composer);
             CREATE INDEX inxComposerAlbumComposersort ON ComposerAlbum (composersort);
             CREATE INDEX inxComposerAlbumComposerType ON ComposerAlbum (composer, albumtype);
             CREATE INDEX inxComposerAlbumAlbum ON ComposerAlbum (album);
             CREATE INDEX inxComposerAlbumLastplayed ON ComposerAlbum (lastplayed);
             CREATE INDEX inxComposerAlbumPlaycount ON ComposerAlbum (playcount);",
        )
        .context("creating ComposerAlbum")?;
    }

    if !table_exists(conn, "ArtistAlbumsonly")? {
        conn.execute_batch(
            "CREATE TABLE ArtistAlbumsonly (album_id integer,
                                            album text COLLATE NOCASE,
                                            artist text,
                                            duplicate integer,
                                            albumtype integer,
                                            albumsort text COLLATE NOCASE,
                                            lastplayed integer,
                                            playcount integer);
             CREATE UNIQUE INDEX inxArtistAlbumsonly ON ArtistAlbumsonly (album_id, album, duplicate, albumtype, albumsort);
             CREATE INDEX inxArtistAlbumsonlyAlbumsort ON ArtistAlbumsonly (albumsort);
             CREATE INDEX inxArtistAlbumsonlyAlbumType ON ArtistAlbumsonly (album, albumtype);
             CREATE INDEX inxArtistAlbumsonlyLastplayed ON ArtistAlbumsonly (lastplayed);
             CREATE INDEX inxArtistAlbumsonlyPlaycount ON ArtistAlbumsonly (playcount);",
        )
        .context("creating ArtistAlbumsonly")?;
    }

    if !table_exists(conn, "AlbumartistAlbumsonly")? {
        conn.execute_batch(
            "CREATE TABLE AlbumartistAlbumsonly (album_id integer,
                                                 album text COLLATE NOCASE,
                                                 albumartist text,
                                                 duplicate integer,
                                                 albumtype integer,
                                                 albumsort text COLLATE NOCASE,
                                                 lastplayed integer,
                                                 playcount integer);
             CREATE UNIQUE INDEX inxAlbumartistAlbumsonly ON AlbumartistAlbumsonly (album_id, album, duplicate, albumtype, albumsort);
             CREATE INDEX inxAlbumartistAlbumsonlyAlbumsort ON AlbumartistAlbumsonly (albumsort);
             CREATE INDEX inxAlbumartistAlbumsonlyAlbumType ON AlbumartistAlbumsonly (album, albumtype);
             CREATE INDEX inxAlbumartistAlbumsonlyLastplayed ON AlbumartistAlbumsonly (lastplayed);
             CREATE INDEX inxAlbumartistAlbumsonlyPlaycount ON AlbumartistAlbumsonly (playcount);",
        )
        .context("creating AlbumartistAlbumsonly")?;
    }

    // track-level lookups
    if !table_exists(conn, "GenreArtistAlbumTrack")? {
        conn.execute_batch(
            "CREATE TABLE GenreArtistAlbumTrack (track_id integer,
                                                 genre text COLLATE NOCASE,
                                                 artist text COLLATE NOCASE,
                                                 album text COLLATE NOCASE,
                                                 album_id integer,
                                                 duplicate integer,
                                                 albumtype integer);
             CREATE UNIQUE INDEX inxGenreArtistAlbumTrack ON GenreArtistAlbumTrack (track_id, genre, artist, album, duplicate, albumtype);
             CREATE INDEX inxGenreArtistAlbumTrackGenreArtistAlbum ON GenreArtistAlbumTrack (genre, artist, album, albumtype);
             CREATE INDEX inxGenreArtistAlbumTrackGenreArtistAlbumDup ON GenreArtistAlbumTrack (genre, artist, album, duplicate);
             CREATE INDEX inxGenreArtistAlbumTrackGenreArtistAlbumIdDup ON GenreArtistAlbumTrack (genre, artist, album_id, duplicate);",
        )
        .context("creating GenreArtistAlbumTrack")?;
    }

    if !table_exists(conn, "GenreAlbumartistAlbumTrack")? {
        conn.execute_batch(
            "CREATE TABLE GenreAlbumartistAlbumTrack (track_id integer,
                                                      genre text COLLATE NOCASE,
                                                      albumartist text COLLATE NOCASE,
                                                      album text COLLATE NOCASE,
                                                      album_id integer,
                                                      duplicate integer,
                                                      albumtype integer);
             CREATE UNIQUE INDEX inxGenreAlbumartistAlbumTrack ON GenreAlbumartistAlbumTrack (track_id, genre, albumartist, album, duplicate, albumtype);
             CREATE INDEX inxGenreAlbumartistAlbumTrackGenreAlbumArtistAlbum ON GenreAlbumartistAlbumTrack (genre, albumartist, album, albumtype);
             CREATE INDEX inxGenreAlbumartistAlbumTrackGenreAlbumArtistAlbumDup ON GenreAlbumartistAlbumTrack (genre, albumartist, album, duplicate);
             CREATE INDEX inxGenreAlbumartistAlbumTrackGenreAlbumArtistAlbumIdDup ON GenreAlbumartistAlbumTrack (genre, albumartist, album_id, duplicate);",
        )
        .context("creating GenreAlbumartistAlbumTrack")?;
    }

    if !table_exists(conn, "ArtistAlbumTrack")? {
        conn.execute_batch(
            "CREATE TABLE ArtistAlbumTrack (track_id integer,
                                            artist text COLLATE NOCASE,
                                            album text COLLATE NOCASE,
                                            album_id integer,
                                            duplicate integer,
                                            albumtype integer);
             CREATE UNIQUE INDEX inxArtistAlbumTrack ON ArtistAlbumTrack (track_id, artist, album, duplicate, albumtype);
             CREATE INDEX inxArtistAlbumTrackArtistAlbum ON ArtistAlbumTrack (artist, album, albumtype);
             CREATE INDEX inxArtistAlbumTrackArtistAlbumDup ON ArtistAlbumTrack (artist, album, duplicate, albumtype);
             CREATE INDEX inxArtistAlbumTrackArtistAlbumIdDup ON ArtistAlbumTrack (artist, album_id, duplicate, albumtype);",
        )
        .context("creating ArtistAlbumTrack")?;
    }

    if !table_exists(conn, "AlbumartistAlbumTrack")? {
        conn.execute_batch(
            "CREATE TABLE AlbumartistAlbumTrack (track_id integer,
                                                 albumartist text COLLATE NOCASE,
                                                 album text COLLATE NOCASE,
                                                 album_id integer,
                                                 duplicate integer,
                                                 albumtype integer);
             CREATE UNIQUE INDEX inxAlbumArtistAlbumTrack ON AlbumartistAlbumTrack (track_id, albumartist, album, duplicate, albumtype);
             CREATE INDEX inxAlbumArtistAlbumTrackAlbumArtistAlbum ON AlbumartistAlbumTrack (albumartist, album, albumtype);
             CREATE INDEX inxAlbumArtistAlbumTrackAlbumArtistAlbumDup ON AlbumartistAlbumTrack (albumartist, album, duplicate, albumtype);
             CREATE INDEX inxAlbumArtistAlbumTrackAlbumArtistAlbumIdDup ON AlbumartistAlbumTrack (albumartist, album_id, duplicate, albumtype);",
        )
        .context("creating AlbumartistAlbumTrack")?;
    }

    if !table_exists(conn, "ComposerAlbumTrack")? {
        conn.execute_batch(
            "CREATE TABLE ComposerAlbumTrack (track_id integer,
                                              composer text COLLATE NOCASE,
                                              album text COLLATE NOCASE,
                                              album_id integer,
                                              duplicate integer,
                                              albumtype integer);
             CREATE UNIQUE INDEX inxComposerAlbumTrack ON ComposerAlbumTrack (track_id, composer, album, duplicate, albumtype);
             CREATE INDEX inxComposerAlbumTrackComposerAlbum ON ComposerAlbumTrack (composer, album, albumtype);
             CREATE INDEX inxComposerAlbumTrackComposerAlbumDup ON ComposerAlbumTrack (composer, album, duplicate, albumtype);
             CREATE INDEX inxComposerAlbumTrackComposerAlbumIdDup ON ComposerAlbumTrack (composer, album_id, duplicate, albumtype);",
        )
        .context("creating ComposerAlbumTrack")?;
    }

    if !table_exists(conn, "TrackNumbers")? {
        conn.execute_batch(
            "CREATE TABLE TrackNumbers (track_id integer,
                                        genre text COLLATE NOCASE,
                                        artist text COLLATE NOCASE,
                                        albumartist text COLLATE NOCASE,
                                        album text COLLATE NOCASE,
                                        dummyalbum text COLLATE NOCASE,
                                        composer text COLLATE NOCASE,
                                        duplicate integer,
                                        albumtype integer,
                                        tracknumber integer,
                                        coverart text,
                                        coverartid integer);
             CREATE UNIQUE INDEX inxTrackNumbers ON TrackNumbers (track_id, genre, artist, albumartist, album, dummyalbum, composer, duplicate, albumtype, tracknumber, coverart, coverartid);
             CREATE INDEX inxTrackNumbersGenreArtist ON TrackNumbers (genre, artist, dummyalbum, duplicate, albumtype);
             CREATE INDEX inxTrackNumbersGenreAlbumartist ON TrackNumbers (genre, albumartist, dummyalbum, duplicate, albumtype);
             CREATE INDEX inxTrackNumbersArtist ON TrackNumbers (artist, dummyalbum, duplicate, albumtype);
             CREATE INDEX inxTrackNumbersAlbumartist ON TrackNumbers (albumartist, dummyalbum, duplicate, albumtype);
             CREATE INDEX inxTrackNumbersComposer ON TrackNumbers (composer, dummyalbum, duplicate, albumtype);",
        )
        .context("creating TrackNumbers")?;
    }

    Ok(())
}

/// Drop every known target table for a regenerate run.
/// Checks for the last table in the create order so a fresh file is a
/// no-op.
pub fn empty_database(conn: &Connection) -> Result<()> {
    if !table_exists(conn, "TrackNumbers")? {
        return Ok(());
    }
    log_action("DELETE", "tracks data");
    conn.execute_batch(
        "DROP TABLE IF EXISTS params;
         DROP TABLE IF EXISTS wvlookup;
         DROP TABLE IF EXISTS tracks;
         DROP TABLE IF EXISTS albums;
         DROP TABLE IF EXISTS albumsonly;
         DROP TABLE IF EXISTS Artist;
         DROP TABLE IF EXISTS Albumartist;
         DROP TABLE IF EXISTS Composer;
         DROP TABLE IF EXISTS Genre;
         DROP TABLE IF EXISTS GenreArtist;
         DROP TABLE IF EXISTS GenreAlbumartist;
         DROP TABLE IF EXISTS GenreArtistAlbum;
         DROP TABLE IF EXISTS GenreAlbumartistAlbum;
         DROP TABLE IF EXISTS ArtistAlbum;
         DROP TABLE IF EXISTS AlbumartistAlbum;
         DROP TABLE IF EXISTS ComposerAlbum;
         DROP TABLE IF EXISTS ArtistAlbumsonly;
         DROP TABLE IF EXISTS AlbumartistAlbumsonly;
         DROP TABLE IF EXISTS GenreArtistAlbumTrack;
         DROP TABLE IF EXISTS GenreAlbumartistAlbumTrack;
         DROP TABLE IF EXISTS ArtistAlbumTrack;
         DROP TABLE IF EXISTS AlbumartistAlbumTrack;
         DROP TABLE IF EXISTS ComposerAlbumTrack;
         DROP TABLE IF EXISTS TrackNumbers;",
    )
    .context("dropping track tables")?;
    Ok(())
}

/// Record the configured work/virtual names in wvlookup.
/// Names already present keep their existing number.
pub fn record_wv_numbers(conn: &Connection, numbers: &[(String, i64)]) -> Result<()> {
    let mut check = conn.prepare_cached("SELECT 1 FROM wvlookup WHERE wvtype=? AND wvnumber=?")?;
    let mut insert = conn.prepare_cached("INSERT INTO wvlookup VALUES (?, ?)")?;
    for (name, number) in numbers {
        let exists = check.exists(rusqlite::params![name, number])?;
        if !exists {
            insert.execute(rusqlite::params![name, number])?;
        }
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_create_database_idempotent() {
        let conn = open();
        create_database(&conn).unwrap();
        create_database(&conn).unwrap();
        assert!(table_exists(&conn, "tracks").unwrap());
        assert!(table_exists(&conn, "TrackNumbers").unwrap());
        let params: i64 = conn
            .query_row("SELECT count(*) FROM params", [], |r| r.get(0))
            .unwrap();
        assert_eq!(params, 1);
    }

    #[test]
    fn test_band_seeding() {
        let conn = open();
        create_database(&conn).unwrap();
        conn.execute(
            "INSERT INTO Artist (artist, lastplayed, playcount) VALUES ('X', '', '')",
            [],
        )
        .unwrap();
        let id: i64 = conn
            .query_row("SELECT id FROM Artist WHERE artist='X'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(id, ARTIST_BAND + 1);

        conn.execute(
            "INSERT INTO albums (albumlist, artistlist, albumartistlist, duplicate, albumtype, tracknumbers)
             VALUES ('A', 'B', 'B', 0, 10, '1')",
            [],
        )
        .unwrap();
        let id: i64 = conn
            .query_row("SELECT id FROM albums WHERE albumlist='A'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(id, ALBUM_BAND + 1);
    }

    #[test]
    fn test_empty_database_drops_everything() {
        let conn = open();
        create_database(&conn).unwrap();
        empty_database(&conn).unwrap();
        assert!(!table_exists(&conn, "tracks").unwrap());
        assert!(!table_exists(&conn, "params").unwrap());
        // and a fresh create works again
        create_database(&conn).unwrap();
        assert!(table_exists(&conn, "tracks").unwrap());
    }

    #[test]
    fn test_record_wv_numbers_no_duplicates() {
        let conn = open();
        create_database(&conn).unwrap();
        let numbers = vec![
            ("_ALBUM".to_string(), 10),
            ("_DEFAULT_WORK".to_string(), 200),
        ];
        record_wv_numbers(&conn, &numbers).unwrap();
        record_wv_numbers(&conn, &numbers).unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM wvlookup", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_nocase_key_comparison() {
        let conn = open();
        create_database(&conn).unwrap();
        conn.execute(
            "INSERT INTO Artist (artist, lastplayed, playcount) VALUES ('Beatles', '', '')",
            [],
        )
        .unwrap();
        let found: i64 = conn
            .query_row(
                "SELECT count(*) FROM Artist WHERE artist='bEATLES'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(found, 1);
    }
}
