//! Flag sets contributed by subsystems and the shared namespace they merge
//! into.
//!
//! Each subsystem owns a named [`FlagSet`]. The builder registers every set
//! into one [`FlagNamespace`], which rejects any collision on a flag id, long
//! name, or short name before the command line is parsed.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use clap::parser::ValueSource;
use clap::{Arg, ArgMatches};
use thiserror::Error;

/// Owner recorded for flags that `clap` provides itself.
pub const BUILTIN_FLAG_OWNER: &str = "builtin";

/// Named collection of command-line flags owned by one subsystem.
#[derive(Debug, Clone)]
pub struct FlagSet {
    name: String,
    args: Vec<Arg>,
}

impl FlagSet {
    /// Creates an empty set owned by `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Adds a flag to the set.
    #[must_use]
    pub fn arg(mut self, arg: Arg) -> Self {
        self.args.push(arg);
        self
    }

    /// Name of the owning subsystem.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Flags in declaration order.
    #[must_use]
    pub const fn args(&self) -> &[Arg] {
        self.args.as_slice()
    }
}

/// Errors raised while registering or reading flags.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlagError {
    /// Two flag sets declared the same flag name.
    #[error("flag '{flag}' from flag set '{second}' collides with flag set '{first}'")]
    Duplicate {
        /// Colliding flag name as written on the command line.
        flag: String,
        /// Set that registered the name first.
        first: String,
        /// Set whose registration was rejected.
        second: String,
    },
    /// A parsed flag could not be read as the requested type.
    #[error("failed to read flag '{flag}': {message}")]
    Lookup {
        /// Flag id that was queried.
        flag: String,
        /// Description of the lookup failure.
        message: String,
    },
    /// A flag value parsed but violated its format.
    #[error("invalid value '{value}' for flag '{flag}': {message}")]
    InvalidValue {
        /// Flag id carrying the value.
        flag: String,
        /// Offending value.
        value: String,
        /// Description of the violation.
        message: String,
    },
}

/// Merged namespace of every registered flag set.
#[derive(Debug, Clone)]
pub struct FlagNamespace {
    owners: BTreeMap<String, String>,
    sets: Vec<FlagSet>,
}

impl Default for FlagNamespace {
    fn default() -> Self {
        let mut owners = BTreeMap::new();
        owners.insert(String::from("--help"), BUILTIN_FLAG_OWNER.to_owned());
        owners.insert(String::from("-h"), BUILTIN_FLAG_OWNER.to_owned());
        owners.insert(String::from("help"), BUILTIN_FLAG_OWNER.to_owned());
        Self {
            owners,
            sets: Vec::new(),
        }
    }
}

impl FlagNamespace {
    /// Creates a namespace holding only the built-in help flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every flag of `set`.
    ///
    /// The set is checked as a whole before anything is recorded, so a
    /// rejected set leaves the namespace unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`FlagError::Duplicate`] when any id, long name, or short name
    /// is already taken, including by another flag in the same set.
    pub fn register(&mut self, set: FlagSet) -> Result<(), FlagError> {
        let mut claimed: BTreeMap<String, String> = BTreeMap::new();
        for key in set.args.iter().flat_map(flag_keys) {
            if let Some(first) = self.owners.get(&key).or_else(|| claimed.get(&key)) {
                return Err(FlagError::Duplicate {
                    flag: key,
                    first: first.clone(),
                    second: set.name.clone(),
                });
            }
            claimed.insert(key, set.name.clone());
        }
        self.owners.extend(claimed);
        self.sets.push(set);
        Ok(())
    }

    /// Registered flag sets in registration order.
    #[must_use]
    pub const fn sets(&self) -> &[FlagSet] {
        self.sets.as_slice()
    }

    /// Every registered flag id, grouped by set in registration order.
    #[must_use]
    pub fn flag_ids(&self) -> Vec<String> {
        self.sets
            .iter()
            .flat_map(|set| set.args.iter().map(|arg| arg.get_id().as_str().to_owned()))
            .collect()
    }

    /// Name of the set owning `key` (`--long`, `-s`, or a bare id).
    #[must_use]
    pub fn owner(&self, key: &str) -> Option<&str> {
        self.owners.get(key).map(String::as_str)
    }

    /// Flags of every set, in registration order, ready for the parser.
    pub(crate) fn into_args(self) -> impl Iterator<Item = Arg> {
        self.sets.into_iter().flat_map(|set| set.args)
    }
}

fn flag_keys(arg: &Arg) -> Vec<String> {
    let mut keys = vec![arg.get_id().as_str().to_owned()];
    if let Some(long) = arg.get_long() {
        keys.push(format!("--{long}"));
    }
    if let Some(short) = arg.get_short() {
        keys.push(format!("-{short}"));
    }
    keys
}

/// Parsed command line, read through typed, non-panicking accessors.
#[derive(Clone)]
pub struct ParsedFlags {
    matches: ArgMatches,
}

impl fmt::Debug for ParsedFlags {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ParsedFlags")
            .field("ids", &self.matches.ids().map(clap::Id::as_str).collect::<Vec<_>>())
            .finish()
    }
}

impl ParsedFlags {
    /// Wraps parser output.
    #[must_use]
    pub const fn new(matches: ArgMatches) -> Self {
        Self { matches }
    }

    /// Reads a single typed value, `None` when the flag was not supplied.
    ///
    /// # Errors
    ///
    /// Returns [`FlagError::Lookup`] when the flag is unknown or holds a
    /// different type.
    pub fn value<T>(&self, id: &str) -> Result<Option<T>, FlagError>
    where
        T: Any + Clone + Send + Sync + 'static,
    {
        self.matches
            .try_get_one::<T>(id)
            .map(Option::<&T>::cloned)
            .map_err(|error| lookup_error(id, &error))
    }

    /// Reads a string value.
    ///
    /// # Errors
    ///
    /// Returns [`FlagError::Lookup`] as for [`ParsedFlags::value`].
    pub fn string(&self, id: &str) -> Result<Option<String>, FlagError> {
        self.value::<String>(id)
    }

    /// Reads every value of a repeatable string flag.
    ///
    /// # Errors
    ///
    /// Returns [`FlagError::Lookup`] as for [`ParsedFlags::value`].
    pub fn strings(&self, id: &str) -> Result<Vec<String>, FlagError> {
        self.matches
            .try_get_many::<String>(id)
            .map(|values| values.map(|found| found.cloned().collect()).unwrap_or_default())
            .map_err(|error| lookup_error(id, &error))
    }

    /// Reads a boolean switch.
    ///
    /// # Errors
    ///
    /// Returns [`FlagError::Lookup`] as for [`ParsedFlags::value`].
    pub fn switch(&self, id: &str) -> Result<bool, FlagError> {
        self.value::<bool>(id).map(Option::unwrap_or_default)
    }

    /// Returns `true` when the value came from the command line or the
    /// environment rather than a declared default.
    #[must_use]
    pub fn is_explicit(&self, id: &str) -> bool {
        matches!(
            self.matches.value_source(id),
            Some(ValueSource::CommandLine | ValueSource::EnvVariable)
        )
    }

    /// Name of the selected subcommand, if any.
    #[must_use]
    pub fn subcommand_name(&self) -> Option<&str> {
        self.matches.subcommand_name()
    }
}

fn lookup_error(id: &str, error: &clap::parser::MatchesError) -> FlagError {
    FlagError::Lookup {
        flag: id.to_owned(),
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{ArgAction, Command};
    use rstest::rstest;

    fn set(name: &str, long: &'static str) -> FlagSet {
        FlagSet::new(name).arg(Arg::new(long).long(long))
    }

    #[rstest]
    fn registers_disjoint_sets_in_order() {
        let mut namespace = FlagNamespace::new();
        namespace.register(set("a", "alpha")).expect("register a");
        namespace.register(set("b", "beta")).expect("register b");
        assert_eq!(namespace.flag_ids(), vec!["alpha", "beta"]);
        assert_eq!(namespace.owner("--beta"), Some("b"));
    }

    #[rstest]
    #[case::forward(("a", "b"))]
    #[case::reverse(("b", "a"))]
    fn rejects_collisions_in_either_order(#[case] order: (&str, &str)) {
        let mut namespace = FlagNamespace::new();
        namespace
            .register(set(order.0, "shared"))
            .expect("first registration");
        let error = namespace
            .register(set(order.1, "shared"))
            .expect_err("collision should be rejected");
        assert_eq!(
            error,
            FlagError::Duplicate {
                flag: String::from("shared"),
                first: order.0.to_owned(),
                second: order.1.to_owned(),
            }
        );
    }

    #[rstest]
    fn rejects_short_name_collisions_across_ids() {
        let mut namespace = FlagNamespace::new();
        namespace
            .register(FlagSet::new("a").arg(Arg::new("verbose").short('v')))
            .expect("first registration");
        let error = namespace
            .register(FlagSet::new("b").arg(Arg::new("version-flag").short('v')))
            .expect_err("short collision");
        assert!(matches!(error, FlagError::Duplicate { flag, .. } if flag == "-v"));
    }

    #[rstest]
    fn rejects_builtin_help() {
        let mut namespace = FlagNamespace::new();
        let error = namespace
            .register(FlagSet::new("a").arg(Arg::new("hostname").short('h')))
            .expect_err("help collision");
        assert!(matches!(error, FlagError::Duplicate { first, .. } if first == BUILTIN_FLAG_OWNER));
    }

    #[rstest]
    fn rejected_set_leaves_namespace_unchanged() {
        let mut namespace = FlagNamespace::new();
        namespace.register(set("a", "alpha")).expect("register a");
        let rejected = FlagSet::new("b")
            .arg(Arg::new("beta").long("beta"))
            .arg(Arg::new("alpha").long("alpha"));
        namespace.register(rejected).expect_err("collision");
        assert_eq!(namespace.owner("--beta"), None);
        assert_eq!(namespace.sets().len(), 1);
    }

    #[rstest]
    fn parsed_flags_read_typed_values() {
        let matches = Command::new("test")
            .arg(Arg::new("port").long("port").value_parser(clap::value_parser!(u16)))
            .arg(Arg::new("tag").long("tag").action(ArgAction::Append))
            .arg(Arg::new("quiet").long("quiet").action(ArgAction::SetTrue))
            .try_get_matches_from(["test", "--port", "80", "--tag", "a", "--tag", "b"])
            .expect("parse");
        let flags = ParsedFlags::new(matches);
        assert_eq!(flags.value::<u16>("port").expect("port"), Some(80));
        assert_eq!(flags.strings("tag").expect("tags"), vec!["a", "b"]);
        assert!(!flags.switch("quiet").expect("quiet"));
        assert!(flags.is_explicit("port"));
        assert!(flags.string("port").is_err());
    }
}
