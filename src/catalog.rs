use memmap2::Mmap;
use serde::{Serialize, Serializer};
use std::fmt;
use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::config::{DEFAULT_MAX_HYMNS, PRESENTATION_EXTENSION};
use crate::error::{ArchiveFault, CatalogError, ParseHymnNumberError};

/// Hymn number as used in archive names and statistics keys.
///
/// Always rendered as three zero-padded digits. `0` marks a name whose
/// number slot did not hold digits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HymnNumber(pub u16);

impl HymnNumber {
    pub const SENTINEL: HymnNumber = HymnNumber(0);

    pub fn get(self) -> u16 {
        self.0
    }

    pub fn is_sentinel(self) -> bool {
        self.0 == 0
    }

    /// Reads the number typed at the start of a search entry (`"12"`, `"012 Title"`).
    /// Returns `None` unless the first three characters are all digits and non-zero.
    pub fn parse_prefix(raw: &str) -> Option<Self> {
        let prefix: String = raw.chars().take(3).collect();
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        match prefix.parse::<u16>() {
            Ok(0) | Err(_) => None,
            Ok(n) => Some(Self(n)),
        }
    }
}

impl fmt::Display for HymnNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

impl FromStr for HymnNumber {
    type Err = ParseHymnNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.len() > 3 || !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(ParseHymnNumberError(s.to_string()));
        }
        s.parse::<u16>()
            .map(Self)
            .map_err(|_| ParseHymnNumberError(s.to_string()))
    }
}

impl Serialize for HymnNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Category {
    #[serde(rename = "EN")]
    Primary,
    #[serde(rename = "TL")]
    Secondary,
    #[serde(rename = "US")]
    UserDefined,
}

impl Category {
    /// Priority order used for classification and lookups.
    pub const ALL: [Category; 3] = [Category::Primary, Category::Secondary, Category::UserDefined];

    pub fn code(self) -> &'static str {
        match self {
            Category::Primary => "EN",
            Category::Secondary => "TL",
            Category::UserDefined => "US",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One archive member name split into its positional parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub code: String,
    pub category: Option<Category>,
    pub number: HymnNumber,
    pub title: String,
    pub extension: String,
}

/// Splits `"EN/001 Title.pptx"` (or `"EN 001 Title.pptx"`) by fixed offsets.
///
/// Category is characters 1-2, number is characters 4-6, title runs from
/// character 8 up to the last five characters (`.pptx`), and the extension is
/// whatever follows the final dot. Offsets are counted in characters, so
/// non-ASCII titles never split a code point.
pub fn split_entry_name(name: &str) -> CatalogEntry {
    let len = name.chars().count();
    let slice = |from: usize, to: usize| -> String {
        if from >= to {
            return String::new();
        }
        name.chars().skip(from).take(to - from).collect()
    };

    let code = slice(0, 2.min(len));
    let number_part = slice(3.min(len), 6.min(len));
    let number = if !number_part.is_empty() && number_part.chars().all(|c| c.is_ascii_digit()) {
        number_part
            .parse::<u16>()
            .map(HymnNumber)
            .unwrap_or(HymnNumber::SENTINEL)
    } else {
        HymnNumber::SENTINEL
    };
    let title = slice(7.min(len), len.saturating_sub(5));
    let extension = name.rsplit('.').next().unwrap_or(name).to_string();

    CatalogEntry {
        category: Category::from_code(&code),
        code,
        number,
        title,
        extension,
    }
}

fn is_directory_marker(name: &str) -> bool {
    name.ends_with('/')
}

/// Numbers and titles of one category, index-aligned.
#[derive(Debug, Clone, Default)]
pub struct CategoryIndex {
    numbers: Vec<HymnNumber>,
    titles: Vec<String>,
}

impl CategoryIndex {
    fn push(&mut self, number: HymnNumber, title: String) {
        self.numbers.push(number);
        self.titles.push(title);
    }

    pub fn numbers(&self) -> &[HymnNumber] {
        &self.numbers
    }

    pub fn titles(&self) -> &[String] {
        &self.titles
    }

    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }

    pub fn position(&self, number: HymnNumber) -> Option<usize> {
        self.numbers.iter().position(|n| *n == number)
    }

    pub fn contains(&self, number: HymnNumber) -> bool {
        self.position(number).is_some()
    }

    pub fn get(&self, index: usize) -> Option<(HymnNumber, &str)> {
        let number = *self.numbers.get(index)?;
        let title = self.titles.get(index)?;
        Some((number, title.as_str()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (HymnNumber, &str)> {
        self.numbers
            .iter()
            .copied()
            .zip(self.titles.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub primary: usize,
    pub secondary: usize,
    pub user: usize,
    pub all: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Missing {
    pub list: Vec<HymnNumber>,
    pub length: usize,
}

#[derive(Debug, Clone)]
pub struct CatalogOptions {
    pub max_hymns: u16,
    pub extension: String,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            max_hymns: DEFAULT_MAX_HYMNS,
            extension: PRESENTATION_EXTENSION.to_string(),
        }
    }
}

/// Immutable per-session index of the archive.
#[derive(Debug, Clone)]
pub struct Catalog {
    max_hymns: u16,
    primary: CategoryIndex,
    secondary: CategoryIndex,
    user_defined: CategoryIndex,
    all_entries: Vec<String>,
    totals: Totals,
    missing: Missing,
    stray_files: Vec<String>,
    unclassified: Vec<String>,
    duplicates: Vec<String>,
}

impl Catalog {
    pub fn from_entry_names<I, S>(names: I, options: &CatalogOptions) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut primary = CategoryIndex::default();
        let mut secondary = CategoryIndex::default();
        let mut user_defined = CategoryIndex::default();
        let mut stray_files = Vec::new();
        let mut unclassified = Vec::new();
        let mut duplicates = Vec::new();

        for name in names {
            let name = name.as_ref();
            let entry = split_entry_name(name);

            if entry.extension != options.extension {
                if !is_directory_marker(name) {
                    warn!("Unnecessary file \"{name}\" detected inside the archive");
                    stray_files.push(name.to_string());
                }
                continue;
            }

            let Some(category) = entry.category else {
                debug!("Skipping \"{name}\": unknown category code {:?}", entry.code);
                unclassified.push(name.to_string());
                continue;
            };
            if entry.number.is_sentinel() {
                warn!("Skipping \"{name}\": no hymn number in the name");
                unclassified.push(name.to_string());
                continue;
            }

            let index = match category {
                Category::Primary => &mut primary,
                Category::Secondary => &mut secondary,
                Category::UserDefined => &mut user_defined,
            };
            if index.contains(entry.number) {
                warn!("Duplicate {category} entry #{} in \"{name}\"", entry.number);
                duplicates.push(name.to_string());
            }
            index.push(entry.number, entry.title);
        }

        let mut all_entries: Vec<String> = [&primary, &secondary, &user_defined]
            .into_iter()
            .flat_map(|index| index.iter().map(|(n, t)| format!("{n} {t}")))
            .collect();
        all_entries.sort();

        let totals = Totals {
            primary: primary.len(),
            secondary: secondary.len(),
            user: user_defined.len(),
            all: all_entries.len(),
        };

        let list: Vec<HymnNumber> = (1..=options.max_hymns)
            .map(HymnNumber)
            .filter(|n| {
                !(primary.contains(*n) || secondary.contains(*n) || user_defined.contains(*n))
            })
            .collect();
        if list.is_empty() {
            info!("The hymnal is complete");
        } else {
            let joined: Vec<String> = list.iter().map(|n| format!("#{n}")).collect();
            warn!("{} hymns are missing", list.len());
            warn!("Hymns that are missing: {}", joined.join(", "));
        }

        Self {
            max_hymns: options.max_hymns,
            primary,
            secondary,
            user_defined,
            all_entries,
            totals,
            missing: Missing {
                length: list.len(),
                list,
            },
            stray_files,
            unclassified,
            duplicates,
        }
    }

    pub fn index(&self, category: Category) -> &CategoryIndex {
        match category {
            Category::Primary => &self.primary,
            Category::Secondary => &self.secondary,
            Category::UserDefined => &self.user_defined,
        }
    }

    pub fn max_hymns(&self) -> u16 {
        self.max_hymns
    }

    pub fn all_entries(&self) -> &[String] {
        &self.all_entries
    }

    pub fn totals(&self) -> Totals {
        self.totals
    }

    pub fn missing(&self) -> &Missing {
        &self.missing
    }

    pub fn is_missing(&self, number: HymnNumber) -> bool {
        self.missing.list.binary_search(&number).is_ok()
    }

    pub fn contains(&self, number: HymnNumber) -> bool {
        Category::ALL
            .into_iter()
            .any(|c| self.index(c).contains(number))
    }

    pub fn in_range(&self, number: HymnNumber) -> bool {
        !number.is_sentinel() && number.get() <= self.max_hymns
    }

    pub fn stray_files(&self) -> &[String] {
        &self.stray_files
    }

    pub fn unclassified(&self) -> &[String] {
        &self.unclassified
    }

    pub fn duplicates(&self) -> &[String] {
        &self.duplicates
    }
}

pub fn build_catalog(archive_path: &Path, options: &CatalogOptions) -> Result<Catalog, CatalogError> {
    let start = Instant::now();
    let names = read_entry_names(archive_path).map_err(|source| CatalogError::ArchiveUnreadable {
        path: archive_path.to_path_buf(),
        source,
    })?;

    let catalog = Catalog::from_entry_names(&names, options);
    info!(
        "Scanned {} hymns in {} ({:.2} ms)",
        catalog.totals().all,
        archive_path.display(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(catalog)
}

fn read_entry_names(archive_path: &Path) -> Result<Vec<String>, ArchiveFault> {
    let file = File::open(archive_path)?;
    // SAFETY: The file is opened read-only and outlives the mapping.
    let mmap = unsafe { Mmap::map(&file)? };
    let mut archive = ZipArchive::new(Cursor::new(&mmap[..]))?;

    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        names.push(entry.name().to_string());
    }
    Ok(names)
}
