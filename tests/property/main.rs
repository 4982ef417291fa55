mod exit_rules;
mod link_buffer;
mod templates;
