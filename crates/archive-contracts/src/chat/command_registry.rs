#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    pub arg_key: &'static str,
}

/// Commands whose whole remainder is one free-text argument.
pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "search",
        action: "search",
        arg_key: "query",
    },
    CommandSpec {
        command: "filter",
        action: "set_filter",
        arg_key: "query",
    },
    CommandSpec {
        command: "category",
        action: "select_category",
        arg_key: "category",
    },
    CommandSpec {
        command: "apply",
        action: "apply_edit",
        arg_key: "instruction",
    },
];

/// Commands that take a single record id.
pub(crate) const ID_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "preview",
        action: "preview",
        arg_key: "id",
    },
    CommandSpec {
        command: "edit",
        action: "start_edit",
        arg_key: "id",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "more",
        action: "load_more",
        arg_key: "",
    },
    CommandSpec {
        command: "list",
        action: "list",
        arg_key: "",
    },
    CommandSpec {
        command: "categories",
        action: "categories",
        arg_key: "",
    },
    CommandSpec {
        command: "reset",
        action: "reset_edit",
        arg_key: "",
    },
    CommandSpec {
        command: "save",
        action: "save_edit",
        arg_key: "",
    },
    CommandSpec {
        command: "back",
        action: "close_editor",
        arg_key: "",
    },
    CommandSpec {
        command: "home",
        action: "go_home",
        arg_key: "",
    },
    CommandSpec {
        command: "studio",
        action: "go_studio",
        arg_key: "",
    },
    CommandSpec {
        command: "help",
        action: "help",
        arg_key: "",
    },
    CommandSpec {
        command: "exit",
        action: "exit",
        arg_key: "",
    },
    CommandSpec {
        command: "quit",
        action: "exit",
        arg_key: "",
    },
];

pub(crate) const DOWNLOAD_COMMAND: CommandSpec = CommandSpec {
    command: "download",
    action: "download",
    arg_key: "id",
};

pub const STUDIO_HELP_COMMANDS: &[&str] = &[
    "/search",
    "/filter",
    "/category",
    "/more",
    "/list",
    "/categories",
    "/preview",
    "/edit",
    "/apply",
    "/reset",
    "/save",
    "/back",
    "/download",
    "/home",
    "/studio",
    "/help",
    "/exit",
];
