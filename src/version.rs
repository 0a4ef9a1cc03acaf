const VERSION_WITH_GIT: &str = concat!(
    env!("MUDTAP_VERSION_LABEL"),
    " (git ",
    env!("MUDTAP_GIT_SHA"),
    ", built ",
    env!("MUDTAP_BUILD_TIME"),
    ")",
);
const VERSION_NO_GIT: &str = concat!(
    env!("MUDTAP_VERSION_LABEL"),
    " (built ",
    env!("MUDTAP_BUILD_TIME"),
    ")",
);

pub const VERSION: &str = if env!("MUDTAP_GIT_SHA").is_empty() {
    VERSION_NO_GIT
} else {
    VERSION_WITH_GIT
};
