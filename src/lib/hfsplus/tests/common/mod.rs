//! Builds a complete synthetic HFS+ image in memory: volume header,
//! catalog and extents trees, hard-link fixtures, a resource fork, a
//! fragmented file spilling into the extents overflow tree, and one
//! named attribute.

use hfsplus_read::catalog::CatalogKey;
use hfsplus_read::unicode::HfsString;

pub const BLOCK_SIZE: u32 = 512;
pub const TOTAL_BLOCKS: u32 = 128;

pub const CATALOG_NODE_SIZE: usize = 8192;
pub const SMALL_NODE_SIZE: usize = 4096;

// Block map.
const CATALOG_START: u32 = 16; // 32 blocks: 8 KiB header node + 8 KiB leaf
const EXTENTS_START: u32 = 48; // 24 blocks: header + leaf + index node
const ATTR_START: u32 = 72; // 16 blocks: header + leaf

pub const VOLUME_NAME: &str = "FixtureVol";

// CNIDs.
pub const CNID_README: u32 = 16;
pub const CNID_CAFE: u32 = 17;
pub const CNID_DOCS: u32 = 18;
pub const CNID_INNER: u32 = 19;
pub const CNID_FRAG: u32 = 20;
pub const CNID_A_STUB: u32 = 21;
pub const CNID_INODE22: u32 = 22;
pub const CNID_B: u32 = 23;
pub const CNID_HLNK_STUB: u32 = 24;
pub const CNID_FILE_LINK_DIR: u32 = 25;
pub const CNID_BACKUPS: u32 = 26;
pub const CNID_TM_STUB: u32 = 27;
pub const CNID_DIR28: u32 = 28;
pub const CNID_DIR_LINK_DIR: u32 = 29;
pub const CNID_SHARED: u32 = 30;
pub const CNID_SLASH: u32 = 31;
pub const CNID_F900: u32 = 32;

pub const README_LEN: usize = 600;
pub const README_RSRC_LEN: usize = 256;
pub const FRAG_LEN: usize = 10 * 512 - 100;
pub const INODE22_LEN: usize = 700;

/// Blocks of the fragmented file, inline eight first, then the two
/// continued in the overflow tree.
pub const FRAG_BLOCKS: [u32; 10] = [102, 104, 106, 108, 110, 112, 114, 116, 118, 120];

const HFS_EPOCH_OFFSET: u32 = 2_082_844_800;
/// 2020-01-01T00:00:00Z as an HFS+ timestamp.
pub const FIXTURE_DATE: u32 = HFS_EPOCH_OFFSET + 1_577_836_800;

pub fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| seed ^ (i as u8)).collect()
}

pub fn readme_data() -> Vec<u8> {
    pattern(0xA1, README_LEN)
}

pub fn readme_rsrc() -> Vec<u8> {
    pattern(0xB2, README_RSRC_LEN)
}

pub fn frag_data() -> Vec<u8> {
    pattern(0xE5, FRAG_LEN)
}

pub fn inode22_data() -> Vec<u8> {
    pattern(0xF6, INODE22_LEN)
}

#[derive(Default)]
pub struct FixtureOptions {
    pub dirty: bool,
    /// Format as case-sensitive HFSX: "HX" signature, binary catalog
    /// key order.
    pub case_sensitive: bool,
}

fn be16(v: u16) -> [u8; 2] {
    v.to_be_bytes()
}

fn be32(v: u32) -> [u8; 4] {
    v.to_be_bytes()
}

fn put(image: &mut [u8], offset: usize, bytes: &[u8]) {
    image[offset..offset + bytes.len()].copy_from_slice(bytes);
}

fn units(name: &str) -> Vec<u16> {
    name.encode_utf16().collect()
}

fn catalog_key_bytes(parent: u32, name: &[u16]) -> Vec<u8> {
    let mut raw = Vec::new();
    raw.extend(be16((6 + 2 * name.len()) as u16));
    raw.extend(be32(parent));
    raw.extend(be16(name.len() as u16));
    for unit in name {
        raw.extend(be16(*unit));
    }
    raw
}

fn fork_bytes(logical: u64, total_blocks: u32, extents: &[(u32, u32)]) -> Vec<u8> {
    assert!(extents.len() <= 8);
    let mut raw = Vec::new();
    raw.extend(logical.to_be_bytes());
    raw.extend(be32(0)); // clump
    raw.extend(be32(total_blocks));
    for slot in 0..8 {
        let (start, count) = extents.get(slot).copied().unwrap_or((0, 0));
        raw.extend(be32(start));
        raw.extend(be32(count));
    }
    raw
}

fn permissions_bytes(mode: u16, special: u32) -> Vec<u8> {
    let mut raw = Vec::new();
    raw.extend(be32(501)); // uid
    raw.extend(be32(20)); // gid
    raw.push(0); // admin flags
    raw.push(0); // owner flags
    raw.extend(be16(mode));
    raw.extend(be32(special));
    raw
}

fn folder_body(cnid: u32, valence: u32) -> Vec<u8> {
    let mut raw = Vec::new();
    raw.extend(be16(1)); // folder record
    raw.extend(be16(0)); // flags
    raw.extend(be32(valence));
    raw.extend(be32(cnid));
    for _ in 0..5 {
        raw.extend(be32(FIXTURE_DATE));
    }
    raw.extend(permissions_bytes(0o040_755, 0));
    raw.extend([0u8; 16]); // FolderInfo
    raw.extend([0u8; 16]); // ExtendedFolderInfo
    raw.extend(be32(0)); // text encoding
    raw.extend(be32(0)); // reserved
    raw
}

#[derive(Default)]
struct FileSpec {
    creator: u32,
    file_type: u32,
    special: u32,
    data: (u64, u32, Vec<(u32, u32)>),
    rsrc: (u64, u32, Vec<(u32, u32)>),
}

fn file_body(cnid: u32, spec: &FileSpec) -> Vec<u8> {
    let mut raw = Vec::new();
    raw.extend(be16(2)); // file record
    raw.extend(be16(0x0002)); // thread exists
    raw.extend(be32(0)); // reserved1
    raw.extend(be32(cnid));
    for _ in 0..5 {
        raw.extend(be32(FIXTURE_DATE));
    }
    raw.extend(permissions_bytes(0o100_644, spec.special));
    // FileInfo
    raw.extend(be32(spec.file_type));
    raw.extend(be32(spec.creator));
    raw.extend(be16(0)); // finder flags
    raw.extend([0u8; 4]); // location
    raw.extend(be16(0)); // reserved
    raw.extend([0u8; 16]); // ExtendedFileInfo
    raw.extend(be32(0)); // text encoding
    raw.extend(be32(0)); // reserved2
    raw.extend(fork_bytes(spec.data.0, spec.data.1, &spec.data.2));
    raw.extend(fork_bytes(spec.rsrc.0, spec.rsrc.1, &spec.rsrc.2));
    raw
}

fn plain_file(len: usize, blocks: &[(u32, u32)]) -> FileSpec {
    let total: u32 = blocks.iter().map(|&(_, c)| c).sum();
    FileSpec {
        special: 1,
        data: (len as u64, total, blocks.to_vec()),
        ..FileSpec::default()
    }
}

fn thread_body(folder: bool, parent: u32, name: &[u16]) -> Vec<u8> {
    let mut raw = Vec::new();
    raw.extend(be16(if folder { 3 } else { 4 }));
    raw.extend(be16(0)); // reserved
    raw.extend(be32(parent));
    raw.extend(be16(name.len() as u16));
    for unit in name {
        raw.extend(be16(*unit));
    }
    raw
}

/// Assemble one tree node: descriptor, records packed from offset 14,
/// record-offset table at the tail.
fn build_node(
    node_size: usize,
    kind: i8,
    height: u8,
    forward: u32,
    backward: u32,
    records: &[Vec<u8>],
) -> Vec<u8> {
    let mut node = vec![0u8; node_size];
    put(&mut node, 0, &be32(forward));
    put(&mut node, 4, &be32(backward));
    node[8] = kind as u8;
    node[9] = height;
    put(&mut node, 10, &be16(records.len() as u16));
    let mut offset = 14usize;
    for (index, record) in records.iter().enumerate() {
        let at = node_size - 2 * (index + 1);
        put(&mut node, at, &be16(offset as u16));
        put(&mut node, offset, record);
        offset += record.len();
    }
    let free_at = node_size - 2 * (records.len() + 1);
    assert!(offset <= free_at, "records overflow node");
    put(&mut node, free_at, &be16(offset as u16));
    node
}

#[allow(clippy::too_many_arguments)]
fn header_node(
    node_size: usize,
    depth: u16,
    root: u32,
    leaf_records: u32,
    first_leaf: u32,
    last_leaf: u32,
    max_key_length: u16,
    total_nodes: u32,
    key_compare: u8,
    attributes: u32,
) -> Vec<u8> {
    let mut header = Vec::new();
    header.extend(be16(depth));
    header.extend(be32(root));
    header.extend(be32(leaf_records));
    header.extend(be32(first_leaf));
    header.extend(be32(last_leaf));
    header.extend(be16(node_size as u16));
    header.extend(be16(max_key_length));
    header.extend(be32(total_nodes));
    header.extend(be32(0)); // free nodes
    header.extend(be16(0)); // reserved
    header.extend(be32(node_size as u32)); // clump
    header.push(0); // btree type
    header.push(key_compare);
    header.extend(be32(attributes));
    header.extend([0u8; 64]); // reserved3
    let user_data = vec![0u8; 128];
    let map = vec![0u8; node_size - 256];
    build_node(node_size, 1, 0, 0, 0, &[header, user_data, map])
}

fn catalog_records(case_sensitive: bool) -> Vec<Vec<u8>> {
    let cafe_name = "cafe\u{301}.txt";
    let slash_name = "sl/ash.txt";
    let f900_name = "\u{F900}.txt";
    let file_link_dir = "\u{0}\u{0}\u{0}\u{0}HFS+ Private Data";
    let dir_link_dir = ".HFS+ Private Directory Data\u{D}";

    let hlnk = |target: u32| FileSpec {
        creator: u32::from_be_bytes(*b"hfs+"),
        file_type: u32::from_be_bytes(*b"hlnk"),
        special: target,
        ..FileSpec::default()
    };
    let dir_hlnk = |target: u32| FileSpec {
        creator: u32::from_be_bytes(*b"MACS"),
        file_type: u32::from_be_bytes(*b"fdrp"),
        special: target,
        ..FileSpec::default()
    };

    let mut readme = plain_file(README_LEN, &[(96, 2)]);
    readme.rsrc = (README_RSRC_LEN as u64, 1, vec![(98, 1)]);

    let frag_inline: Vec<(u32, u32)> =
        FRAG_BLOCKS[..8].iter().map(|&b| (b, 1)).collect();
    let frag = FileSpec {
        special: 1,
        data: (FRAG_LEN as u64, 10, frag_inline),
        ..FileSpec::default()
    };

    // (key, body) pairs in arbitrary order; sorted below with the
    // crate's own key comparison.
    let entries: Vec<(u32, &str, Vec<u8>)> = vec![
        (1, VOLUME_NAME, folder_body(2, 11)),
        (2, "", thread_body(true, 1, &units(VOLUME_NAME))),
        (2, "readme.txt", file_body(CNID_README, &readme)),
        (2, cafe_name, file_body(CNID_CAFE, &plain_file(10, &[(99, 1)]))),
        (2, "docs", folder_body(CNID_DOCS, 1)),
        (2, "frag.bin", file_body(CNID_FRAG, &frag)),
        (2, "a", file_body(CNID_A_STUB, &hlnk(CNID_INODE22))),
        (2, "b", folder_body(CNID_B, 1)),
        (2, "backups", folder_body(CNID_BACKUPS, 1)),
        (2, slash_name, file_body(CNID_SLASH, &plain_file(3, &[(125, 1)]))),
        (2, f900_name, file_body(CNID_F900, &plain_file(2, &[(126, 1)]))),
        (2, file_link_dir, folder_body(CNID_FILE_LINK_DIR, 1)),
        (2, dir_link_dir, folder_body(CNID_DIR_LINK_DIR, 1)),
        (CNID_README, "", thread_body(false, 2, &units("readme.txt"))),
        (CNID_CAFE, "", thread_body(false, 2, &units(cafe_name))),
        (CNID_DOCS, "", thread_body(true, 2, &units("docs"))),
        (
            CNID_DOCS,
            "inner.txt",
            file_body(CNID_INNER, &plain_file(5, &[(100, 1)])),
        ),
        (CNID_INNER, "", thread_body(false, CNID_DOCS, &units("inner.txt"))),
        (CNID_FRAG, "", thread_body(false, 2, &units("frag.bin"))),
        (CNID_A_STUB, "", thread_body(false, 2, &units("a"))),
        (
            CNID_INODE22,
            "",
            thread_body(false, CNID_FILE_LINK_DIR, &units("iNode22")),
        ),
        (CNID_B, "", thread_body(true, 2, &units("b"))),
        (
            CNID_B,
            "hlnk_to_a",
            file_body(CNID_HLNK_STUB, &hlnk(CNID_INODE22)),
        ),
        (CNID_HLNK_STUB, "", thread_body(false, CNID_B, &units("hlnk_to_a"))),
        (CNID_FILE_LINK_DIR, "", thread_body(true, 2, &units(file_link_dir))),
        (
            CNID_FILE_LINK_DIR,
            "iNode22",
            file_body(CNID_INODE22, &plain_file(INODE22_LEN, &[(122, 2)])),
        ),
        (CNID_BACKUPS, "", thread_body(true, 2, &units("backups"))),
        (
            CNID_BACKUPS,
            "2020-01-01-000000",
            file_body(CNID_TM_STUB, &dir_hlnk(CNID_DIR28)),
        ),
        (
            CNID_TM_STUB,
            "",
            thread_body(false, CNID_BACKUPS, &units("2020-01-01-000000")),
        ),
        (CNID_DIR28, "", thread_body(true, CNID_DIR_LINK_DIR, &units("dir_28"))),
        (
            CNID_DIR28,
            "shared.txt",
            file_body(CNID_SHARED, &plain_file(4, &[(124, 1)])),
        ),
        (CNID_DIR_LINK_DIR, "", thread_body(true, 2, &units(dir_link_dir))),
        (
            CNID_DIR_LINK_DIR,
            "dir_28",
            folder_body(CNID_DIR28, 1),
        ),
        (CNID_SHARED, "", thread_body(false, CNID_DIR28, &units("shared.txt"))),
        (CNID_SLASH, "", thread_body(false, 2, &units(slash_name))),
        (CNID_F900, "", thread_body(false, 2, &units(f900_name))),
    ];

    let mut keyed: Vec<((u32, Vec<u16>), Vec<u8>)> = entries
        .into_iter()
        .map(|(parent, name, body)| {
            let name_units = units(name);
            let mut raw = catalog_key_bytes(parent, &name_units);
            raw.extend(body);
            ((parent, name_units), raw)
        })
        .collect();
    if case_sensitive {
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
    } else {
        keyed.sort_by(|a, b| {
            let left = CatalogKey::<HfsString>::new(a.0 .0, a.0 .1.clone());
            let right = CatalogKey::<HfsString>::new(b.0 .0, b.0 .1.clone());
            left.cmp(&right)
        });
    }
    keyed.into_iter().map(|(_, raw)| raw).collect()
}

fn extent_key_bytes(fork_type: u8, cnid: u32, start_block: u32) -> Vec<u8> {
    let mut raw = Vec::new();
    raw.extend(be16(10));
    raw.push(fork_type);
    raw.push(0);
    raw.extend(be32(cnid));
    raw.extend(be32(start_block));
    raw
}

fn volume_header(options: &FixtureOptions) -> Vec<u8> {
    let mut vh = Vec::new();
    vh.extend(be16(if options.case_sensitive { 0x4858 } else { 0x482B }));
    vh.extend(be16(if options.case_sensitive { 5 } else { 4 }));
    let mut attributes = 1u32 << 13; // journaled
    if !options.dirty {
        attributes |= 1 << 8; // cleanly unmounted
    }
    vh.extend(be32(attributes));
    vh.extend(u32::from_be_bytes(*b"10.0").to_be_bytes());
    vh.extend(be32(0)); // journal info block
    for _ in 0..4 {
        vh.extend(be32(FIXTURE_DATE));
    }
    vh.extend(be32(10)); // file count
    vh.extend(be32(7)); // folder count
    vh.extend(be32(BLOCK_SIZE));
    vh.extend(be32(TOTAL_BLOCKS));
    vh.extend(be32(0)); // free blocks
    vh.extend(be32(0)); // next alloc
    vh.extend(be32(0)); // rsrc clump
    vh.extend(be32(0)); // data clump
    vh.extend(be32(33)); // next cnid
    vh.extend(be32(1)); // write count
    vh.extend(1u64.to_be_bytes()); // encodings
    vh.extend([0u8; 32]); // finder info
    vh.extend(fork_bytes(0, 0, &[])); // allocation file
    vh.extend(fork_bytes(3 * SMALL_NODE_SIZE as u64, 24, &[(EXTENTS_START, 24)]));
    vh.extend(fork_bytes(2 * CATALOG_NODE_SIZE as u64, 32, &[(CATALOG_START, 32)]));
    vh.extend(fork_bytes(2 * SMALL_NODE_SIZE as u64, 16, &[(ATTR_START, 16)]));
    vh.extend(fork_bytes(0, 0, &[])); // startup file
    assert_eq!(vh.len(), 512);
    vh
}

pub fn build_image(options: FixtureOptions) -> Vec<u8> {
    let mut image = vec![0u8; (TOTAL_BLOCKS * BLOCK_SIZE) as usize];

    put(&mut image, 1024, &volume_header(&options));

    // Catalog tree: header node + one leaf.
    let catalog_base = (CATALOG_START * BLOCK_SIZE) as usize;
    let key_compare = if options.case_sensitive { 0xBC } else { 0xCF };
    put(
        &mut image,
        catalog_base,
        &header_node(CATALOG_NODE_SIZE, 1, 1, 36, 1, 1, 516, 2, key_compare, 0x6),
    );
    put(
        &mut image,
        catalog_base + CATALOG_NODE_SIZE,
        &build_node(
            CATALOG_NODE_SIZE,
            -1,
            1,
            0,
            0,
            &catalog_records(options.case_sensitive),
        ),
    );

    // Extents tree: header node, leaf (node 1), root index (node 2).
    let extents_base = (EXTENTS_START * BLOCK_SIZE) as usize;
    put(
        &mut image,
        extents_base,
        &header_node(SMALL_NODE_SIZE, 2, 2, 1, 1, 1, 10, 3, 0, 0x2),
    );
    let mut overflow = extent_key_bytes(0, CNID_FRAG, 8);
    for slot in 0..8 {
        let (start, count) = if slot < 2 {
            (FRAG_BLOCKS[8 + slot], 1)
        } else {
            (0, 0)
        };
        overflow.extend(be32(start));
        overflow.extend(be32(count));
    }
    put(
        &mut image,
        extents_base + SMALL_NODE_SIZE,
        &build_node(SMALL_NODE_SIZE, -1, 1, 0, 0, &[overflow]),
    );
    let mut index_entry = extent_key_bytes(0, CNID_FRAG, 8);
    index_entry.extend(be32(1)); // child: the leaf node
    put(
        &mut image,
        extents_base + 2 * SMALL_NODE_SIZE,
        &build_node(SMALL_NODE_SIZE, 0, 2, 0, 0, &[index_entry]),
    );

    // Attributes tree: one inline attribute on readme.txt.
    let attr_base = (ATTR_START * BLOCK_SIZE) as usize;
    put(
        &mut image,
        attr_base,
        &header_node(SMALL_NODE_SIZE, 1, 1, 1, 1, 1, 266, 2, 0xBC, 0x6),
    );
    let attr_name = units("user.comment");
    let attr_data = b"fixture comment";
    let mut attr = Vec::new();
    attr.extend(be16((12 + 2 * attr_name.len()) as u16));
    attr.extend(be16(0)); // pad
    attr.extend(be32(CNID_README));
    attr.extend(be32(0)); // start block
    attr.extend(be16(attr_name.len() as u16));
    for unit in &attr_name {
        attr.extend(be16(*unit));
    }
    attr.extend(be32(0x10)); // inline data
    attr.extend([0u8; 8]); // reserved
    attr.extend(be32(attr_data.len() as u32));
    attr.extend(attr_data);
    put(
        &mut image,
        attr_base + SMALL_NODE_SIZE,
        &build_node(SMALL_NODE_SIZE, -1, 1, 0, 0, &[attr]),
    );

    // File contents.
    let write_blocks = |image: &mut Vec<u8>, blocks: &[(u32, usize)], data: &[u8]| {
        let mut taken = 0usize;
        for &(block, len) in blocks {
            let end = (taken + len).min(data.len());
            let at = (block * BLOCK_SIZE) as usize;
            image[at..at + end - taken].copy_from_slice(&data[taken..end]);
            taken = end;
        }
        assert_eq!(taken, data.len());
    };

    write_blocks(&mut image, &[(96, 1024)], &readme_data());
    write_blocks(&mut image, &[(98, 512)], &readme_rsrc());
    write_blocks(&mut image, &[(99, 512)], &pattern(0xC3, 10));
    write_blocks(&mut image, &[(100, 512)], &pattern(0xD4, 5));
    let frag_placement: Vec<(u32, usize)> = FRAG_BLOCKS.iter().map(|&b| (b, 512)).collect();
    write_blocks(&mut image, &frag_placement, &frag_data());
    write_blocks(&mut image, &[(122, 1024)], &inode22_data());
    write_blocks(&mut image, &[(124, 512)], &pattern(0x17, 4));
    write_blocks(&mut image, &[(125, 512)], &pattern(0x28, 3));
    write_blocks(&mut image, &[(126, 512)], &pattern(0x39, 2));

    image
}

/// Embed a finished HFS+ image inside a classic-HFS wrapper, the way
/// pre-OS X tooling initialized volumes. Returns the wrapper image and
/// the byte offset the embedded volume landed at.
pub fn wrap_image(inner: &[u8]) -> (Vec<u8>, u64) {
    let alloc_block_size = 1024u32;
    let alloc_start_sectors = 16u16;
    let embed_start_block = 4u16;
    let offset = alloc_start_sectors as u64 * 512 + embed_start_block as u64 * alloc_block_size as u64;

    let mut image = vec![0u8; offset as usize + inner.len()];
    let mdb = 1024;
    put(&mut image, mdb, &be16(0x4244)); // classic HFS signature
    put(&mut image, mdb + 20, &be32(alloc_block_size));
    put(&mut image, mdb + 28, &be16(alloc_start_sectors));
    put(&mut image, mdb + 124, &be16(0x482B));
    put(&mut image, mdb + 126, &be16(embed_start_block));
    put(
        &mut image,
        mdb + 128,
        &be16((inner.len() / alloc_block_size as usize) as u16),
    );
    image[offset as usize..].copy_from_slice(inner);
    (image, offset)
}
