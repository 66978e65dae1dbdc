use std::io::Read;

use ahash::AHashSet;

use crate::error::{PgScrubError, Result};
use crate::header::{Header, VERSION_TABLEAM};
use crate::io::DumpIO;

/// TOC `desc` value marking a COPY row stream for one table.
pub const TABLE_DATA_DESC: &str = "TABLE DATA";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    None,
    PreData,
    Data,
    PostData,
}

impl Section {
    pub fn from_i64(val: i64) -> Self {
        match val {
            1 => Section::PreData,
            2 => Section::Data,
            3 => Section::PostData,
            _ => Section::None,
        }
    }
}

/// Whether the entry's data block offset was known when the TOC was written.
/// Streamed dumps (pg_dump writing to a pipe) cannot backfill offsets and
/// leave the state at `OffsetNotSet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataState {
    Unknown,
    OffsetNotSet,
    OffsetSet,
}

impl DataState {
    pub fn from_byte(val: u8) -> Self {
        match val {
            1 => DataState::OffsetNotSet,
            2 => DataState::OffsetSet,
            _ => DataState::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TocEntry {
    pub dump_id: i64,
    pub had_dumper: bool,
    pub table_oid: String,
    pub oid: String,
    pub tag: String,
    pub desc: String,
    pub section: Section,
    pub defn: String,
    pub drop_stmt: String,
    pub copy_stmt: String,
    pub namespace: String,
    pub tablespace: String,
    /// Table access method; absent before format 1.14.
    pub tableam: Option<String>,
    pub owner: String,
    pub with_oids: String,
    pub dependencies: Vec<i64>,
    pub data_state: DataState,
    pub offset: u64,
}

/// Parse all TOC entries. The reader must be positioned right after the
/// header; on success it is positioned exactly at the first data block tag.
pub fn parse_toc<R: Read>(reader: &mut R, dio: &DumpIO, header: &Header) -> Result<Vec<TocEntry>> {
    let count = dio.read_int(reader)?;
    if count < 0 {
        return Err(PgScrubError::Corrupt(format!(
            "negative TOC entry count {}",
            count
        )));
    }

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let dump_id = dio.read_int(reader)?;
        let had_dumper = dio.read_int(reader)? != 0;
        let table_oid = dio.read_string(reader)?;
        let oid = dio.read_string(reader)?;
        let tag = dio.read_string(reader)?;
        let desc = dio.read_string(reader)?;
        let section = Section::from_i64(dio.read_int(reader)?);
        let defn = dio.read_string(reader)?;
        let drop_stmt = dio.read_string(reader)?;
        let copy_stmt = dio.read_string(reader)?;
        let namespace = dio.read_string(reader)?;
        let tablespace = dio.read_string(reader)?;

        let tableam = if header.is_version_at_least(VERSION_TABLEAM) {
            Some(dio.read_string(reader)?)
        } else {
            None
        };

        let owner = dio.read_string(reader)?;
        let with_oids = dio.read_string(reader)?;

        // Dependency list, terminated by an empty string.
        let mut dependencies = Vec::new();
        loop {
            let dep = dio.read_string(reader)?;
            if dep.is_empty() {
                break;
            }
            match dep.parse::<i64>() {
                Ok(id) => dependencies.push(id),
                Err(_) => eprintln!(
                    "pg_scrub: ignoring non-numeric dependency {:?} in TOC entry {}",
                    dep, dump_id
                ),
            }
        }

        // data_state is a bare byte, not an int
        let data_state = DataState::from_byte(DumpIO::read_byte(reader)?);
        let offset = dio.read_offset(reader)?;

        entries.push(TocEntry {
            dump_id,
            had_dumper,
            table_oid,
            oid,
            tag,
            desc,
            section,
            defn,
            drop_stmt,
            copy_stmt,
            namespace,
            tablespace,
            tableam,
            owner,
            with_oids,
            dependencies,
            data_state,
            offset,
        });
    }

    Ok(entries)
}

/// Parsed header plus table of contents of one dump.
#[derive(Debug, Clone)]
pub struct Dump {
    pub header: Header,
    pub entries: Vec<TocEntry>,
}

impl Dump {
    /// Parse the header and TOC off the front of `reader`, leaving it
    /// positioned at the first data block tag.
    pub fn parse<R: Read>(reader: &mut R) -> Result<Dump> {
        let mut dio = DumpIO::default();
        let header = Header::parse(reader, &mut dio)?;
        let entries = parse_toc(reader, &dio, &header)?;
        Ok(Dump { header, entries })
    }

    /// Dump ids whose data blocks carry COPY row streams.
    pub fn table_data_ids(&self) -> AHashSet<i64> {
        self.entries
            .iter()
            .filter(|e| e.desc == TABLE_DATA_DESC)
            .map(|e| e.dump_id)
            .collect()
    }
}
