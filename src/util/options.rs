use crate::util::constants::{
    BYTES_IN_PAGE, LOG_BYTES_IN_MBYTE, MAX_COMPRESSED_HEAP_SIZE, MIN_REGION_SIZE,
};
use std::default::Default;

/// The default heap size.
pub const DEFAULT_HEAP_SIZE: usize = 64 << LOG_BYTES_IN_MBYTE;
/// The default region size.
pub const DEFAULT_REGION_SIZE: usize = 1 << LOG_BYTES_IN_MBYTE;
/// The default number of queue entries a partial trim leaves behind.
pub const DEFAULT_GC_DRAIN_STACK_TARGET_SIZE: usize = 64;
/// The default number of cards in one dirty card buffer.
pub const DEFAULT_REFINEMENT_BUFFER_SIZE: usize = 256;
/// The default number of entries of a per-worker region mark stats cache.
pub const DEFAULT_REGION_MARK_STATS_CACHE_SIZE: usize = 1024;
/// The oldest age an object can reach. Ages are stored in four header bits.
pub const MAX_OBJECT_AGE: usize = 15;

fn always_valid<T>(_: &T) -> bool {
    true
}

fn is_valid_region_size(v: &usize) -> bool {
    v.is_power_of_two() && *v >= MIN_REGION_SIZE
}

macro_rules! options {
    ($($name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($name: $type[$validator] = $default),*);
    ];
    ($($name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        /// Collector options. Each option can be set by an environment variable with the
        /// `G1_` prefix and the upper case option name, e.g. `G1_HEAP_SIZE=134217728`.
        #[derive(Clone, Debug)]
        pub struct Options {
            $(pub $name: $type),*
        }
        impl Options {
            /// Set an option by its snake case name. An unparsable or invalid value leaves the
            /// option unchanged and is reported as an error.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> Result<(), String> {
                match s {
                    // Parse the given value from str (by env vars or by calling set_from_str()) to the right type
                    $(stringify!($name) => {
                        let val = val
                            .parse::<$type>()
                            .map_err(|_| format!("unable to set {}={:?}: can't parse value", s, val))?;
                        let validate_fn = $validator;
                        if validate_fn(&val) {
                            self.$name = val;
                            Ok(())
                        } else {
                            Err(format!("unable to set {}={:?}: invalid value", s, val))
                        }
                    })*
                    _ => Err(format!("invalid option key: {}", s)),
                }
            }

            /// Build options from the defaults only, ignoring the environment.
            pub fn from_defaults() -> Self {
                Options {
                    $($name: $default),*
                }
            }

            fn read_env_var_settings(&mut self) {
                const PREFIX: &str = "G1_";
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => {
                                if let Err(e) = self.set_from_str(lowercase, &val) {
                                    warn!("{}. Default value will be used.", e);
                                }
                            },)*
                            _ => {}
                        }
                    }
                }
            }
        }
        impl Default for Options {
            /// The defaults, overridden by any `G1_*` environment variables that name an option
            /// and carry a valid value.
            fn default() -> Self {
                let mut options = Self::from_defaults();
                options.read_env_var_settings();
                options
            }
        }
    ]
}

options! {
    // The size of the reserved heap in bytes. Rounded up to a multiple of the region size.
    heap_size:                    usize [|v: &usize| *v > 0]             = DEFAULT_HEAP_SIZE,
    // The size of one heap region in bytes.
    region_size:                  usize [is_valid_region_size]           = DEFAULT_REGION_SIZE,
    // Number of parallel GC workers.
    threads:                      usize [|v: &usize| *v > 0]             = num_cpus::get(),
    // Encode narrow slots as 32-bit offsets from the heap base.
    use_compressed_oops:          bool  [always_valid]                   = true,
    // Partial queue trimming drains down to this many entries.
    gc_drain_stack_target_size:   usize [|v: &usize| *v > 0]             = DEFAULT_GC_DRAIN_STACK_TARGET_SIZE,
    // Number of cards in one dirty card buffer.
    refinement_buffer_size:       usize [|v: &usize| *v > 0]             = DEFAULT_REFINEMENT_BUFFER_SIZE,
    // Number of entries in a per-worker region mark stats cache.
    region_mark_stats_cache_size: usize [|v: &usize| v.is_power_of_two()] = DEFAULT_REGION_MARK_STATS_CACHE_SIZE,
    // Young objects that survived this many pauses are promoted to old regions.
    max_tenuring_threshold:       usize [|v: &usize| *v <= MAX_OBJECT_AGE] = MAX_OBJECT_AGE,
    // Number of concurrent refinement threads.
    conc_refinement_threads:      usize [|v: &usize| *v > 0]             = 1,
}

impl Options {
    /// Set an option by its camel case name, e.g. `heapSize`.
    pub fn set_from_camelcase_str(&mut self, s: &str, val: &str) -> Result<(), String> {
        trace!("Trying to process option pair: ({}, {})", s, val);

        let mut sr = String::with_capacity(s.len());
        for c in s.chars() {
            if c.is_uppercase() {
                sr.push('_');
                for c in c.to_lowercase() {
                    sr.push(c);
                }
            } else {
                sr.push(c)
            }
        }

        let result = self.set_from_str(sr.as_str(), val);
        match result {
            Ok(()) => trace!("Validation passed"),
            Err(ref e) => trace!("Validation failed: {}", e),
        }
        result
    }

    /// The heap size rounded up to whole regions.
    pub fn aligned_heap_size(&self) -> usize {
        crate::util::conversions::raw_align_up(self.heap_size, self.region_size)
    }

    /// Whether narrow slots can address the whole heap.
    pub fn compressed_oops_enabled(&self) -> bool {
        // The encoding base lies one page below the heap.
        self.use_compressed_oops
            && self.aligned_heap_size() + BYTES_IN_PAGE <= MAX_COMPRESSED_HEAP_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::{serial_test, with_cleanup};

    #[test]
    fn no_env_var() {
        serial_test(|| {
            let options = Options::default();
            assert_eq!(options.heap_size, DEFAULT_HEAP_SIZE);
            assert_eq!(options.region_size, DEFAULT_REGION_SIZE);
            assert!(options.use_compressed_oops);
        })
    }

    #[test]
    fn with_valid_env_var() {
        serial_test(|| {
            with_cleanup(
                || {
                    std::env::set_var("G1_REGION_SIZE", "65536");

                    let options = Options::default();
                    assert_eq!(options.region_size, 65536);
                },
                || {
                    std::env::remove_var("G1_REGION_SIZE");
                },
            )
        })
    }

    #[test]
    fn with_multiple_valid_env_vars() {
        serial_test(|| {
            with_cleanup(
                || {
                    std::env::set_var("G1_THREADS", "3");
                    std::env::set_var("G1_USE_COMPRESSED_OOPS", "false");

                    let options = Options::default();
                    assert_eq!(options.threads, 3);
                    assert!(!options.use_compressed_oops);
                },
                || {
                    std::env::remove_var("G1_THREADS");
                    std::env::remove_var("G1_USE_COMPRESSED_OOPS");
                },
            )
        })
    }

    #[test]
    fn with_invalid_env_var_value() {
        serial_test(|| {
            with_cleanup(
                || {
                    // Not a power of two, so the default is kept.
                    std::env::set_var("G1_REGION_SIZE", "100000");
                    std::env::set_var("G1_HEAP_SIZE", "abc");

                    let options = Options::default();
                    assert_eq!(options.region_size, DEFAULT_REGION_SIZE);
                    assert_eq!(options.heap_size, DEFAULT_HEAP_SIZE);
                },
                || {
                    std::env::remove_var("G1_REGION_SIZE");
                    std::env::remove_var("G1_HEAP_SIZE");
                },
            )
        })
    }

    #[test]
    fn with_invalid_env_var_key() {
        serial_test(|| {
            with_cleanup(
                || {
                    std::env::set_var("G1_ABC", "42");

                    let options = Options::default();
                    assert_eq!(options.heap_size, DEFAULT_HEAP_SIZE);
                },
                || {
                    std::env::remove_var("G1_ABC");
                },
            )
        })
    }

    #[test]
    fn set_from_camelcase() {
        let mut options = Options::from_defaults();
        assert!(options
            .set_from_camelcase_str("gcDrainStackTargetSize", "16")
            .is_ok());
        assert_eq!(options.gc_drain_stack_target_size, 16);
        assert!(options.set_from_camelcase_str("regionSize", "1000").is_err());
        assert!(options.set_from_str("no_such_option", "1").is_err());
    }

    #[test]
    fn heap_size_is_rounded_to_regions() {
        let mut options = Options::from_defaults();
        options.set_from_str("region_size", "65536").unwrap();
        options.set_from_str("heap_size", "100000").unwrap();
        assert_eq!(options.aligned_heap_size(), 131072);
    }
}
