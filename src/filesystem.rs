//! Module `filesystem` implement a [TopicDao] over a directory tree.
//!
//! ```text
//! <root>/
//!   <topic>/
//!     HEAD                      file-name of the newest post, empty if none
//!     <id>-<poster>.<ext>       post payload
//!     <id>-<poster>.<ext>.meta  file-name of the post before this one
//! ```
//!
//! Posts form a chain from `HEAD` backwards, reading a topic walks the chain and
//! reverses it. Posters are restricted to word characters so that file names can
//! be parsed back into [PostInfo].

use log::{debug, info, warn};

use std::collections::BTreeSet;
use std::{ffi, fs, path};

use crate::util::is_word;
use crate::{Error, ErrorKind, Result};
use crate::{Post, PostInfo, StoredTopic, TopicDao, TopicName};

const HEAD: &str = "HEAD";
const META_EXT: &str = "meta";

/// Persist topics as directories under `root`, refer module documentation.
pub struct TopicFileSystem {
    root: path::PathBuf,
}

impl TopicDao for TopicFileSystem {
    fn create_topic(&mut self, name: &TopicName) -> Result<()> {
        let dir = self.to_topic_dir(name);
        if dir.exists() {
            err!(Persistence, desc: "topic dir {:?} exists", dir)?;
        }

        err!(IOError, try: fs::create_dir(&dir), "create topic dir {:?}", dir)?;
        self.write_head(name, "")?;
        info!("created topic dir {:?}", dir);
        Ok(())
    }

    fn delete_topic(&mut self, name: &TopicName) -> Result<()> {
        let dir = self.to_topic_dir(name);
        if !dir.is_dir() {
            err!(Persistence, desc: "topic dir {:?} not found", dir)?;
        }

        err!(IOError, try: fs::remove_dir_all(&dir), "remove topic dir {:?}", dir)?;
        info!("removed topic dir {:?}", dir);
        Ok(())
    }

    fn write_post(&mut self, post: &Post, name: &TopicName) -> Result<()> {
        let file_name = to_file_name(&post.info)?;
        let dir = self.to_topic_dir(name);
        if !dir.is_dir() {
            err!(Persistence, desc: "topic dir {:?} not found", dir)?;
        }

        let loc = dir.join(&file_name);
        if loc.exists() {
            err!(Persistence, desc: "post file {:?} exists", loc)?;
        }

        let prev = self.read_head(name)?;
        err!(IOError, try: fs::write(&loc, &post.data), "write post {:?}", loc)?;
        let meta = dir.join(to_meta_name(&file_name));
        err!(IOError, try: fs::write(&meta, prev.as_bytes()), "write meta {:?}", meta)?;
        self.write_head(name, &file_name)?;

        debug!("wrote post {:?} prev:{:?}", loc, prev);
        Ok(())
    }

    fn read_all_topics(&mut self) -> Result<Vec<StoredTopic>> {
        let entries = err!(IOError, try: fs::read_dir(&self.root), "read dir {:?}", self.root)?;

        let mut topics = vec![];
        for entry in entries {
            let entry = err!(IOError, try: entry, "read dir {:?}", self.root)?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = match entry.file_name().to_str().map(TopicName::try_from) {
                Some(Ok(name)) => name,
                _ => {
                    warn!("skipping {:?}, not a topic", entry.path());
                    continue;
                }
            };
            let posts = self.read_posts(&name)?;
            topics.push(StoredTopic { name, posts });
        }
        topics.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(topics)
    }
}

impl TopicFileSystem {
    /// Open the store at `root`, create the directory if missing.
    pub fn new<P: AsRef<path::Path>>(root: P) -> Result<TopicFileSystem> {
        let root = root.as_ref().to_path_buf();
        err!(IOError, try: fs::create_dir_all(&root), "create root {:?}", root)?;
        Ok(TopicFileSystem { root })
    }

    pub fn as_root(&self) -> &path::Path {
        &self.root
    }

    fn to_topic_dir(&self, name: &TopicName) -> path::PathBuf {
        self.root.join(name.as_str())
    }

    fn read_head(&self, name: &TopicName) -> Result<String> {
        let loc = self.to_topic_dir(name).join(HEAD);
        let head = err!(IOError, try: fs::read_to_string(&loc), "read {:?}", loc)?;
        Ok(head.trim().to_string())
    }

    // Replace HEAD by renaming a fully written file over it.
    fn write_head(&self, name: &TopicName, file_name: &str) -> Result<()> {
        let dir = self.to_topic_dir(name);
        let (tmp, loc) = (dir.join(format!("{}.tmp", HEAD)), dir.join(HEAD));
        err!(IOError, try: fs::write(&tmp, file_name.as_bytes()), "write {:?}", tmp)?;
        err!(IOError, try: fs::rename(&tmp, &loc), "rename {:?}", tmp)
    }

    fn read_posts(&self, name: &TopicName) -> Result<Vec<Post>> {
        let dir = self.to_topic_dir(name);

        let mut posts = vec![];
        let mut seen = BTreeSet::new();
        let mut file_name = self.read_head(name)?;
        while !file_name.is_empty() {
            if !seen.insert(file_name.clone()) {
                err!(Persistence, desc: "topic {} loops at {:?}", name, file_name)?;
            }

            let info = from_file_name(&file_name)?;
            let loc = dir.join(&file_name);
            let data = err!(IOError, try: fs::read(&loc), "read post {:?}", loc)?;
            posts.push(Post { info, data });

            let meta = dir.join(to_meta_name(&file_name));
            let prev = err!(IOError, try: fs::read_to_string(&meta), "read meta {:?}", meta)?;
            file_name = prev.trim().to_string();
        }
        posts.reverse();

        debug!("read topic {} with {} posts", name, posts.len());
        Ok(posts)
    }
}

fn to_file_name(info: &PostInfo) -> Result<String> {
    if info.id < 0 {
        err!(Persistence, desc: "negative post id {}", info.id)?;
    }
    if !is_word(&info.poster) {
        err!(Persistence, desc: "poster {:?} is not a word", info.poster)?;
    }
    let ext = info.extension.as_str();
    if ext.chars().any(|ch| matches!(ch, '/' | '\\' | '\0')) {
        err!(Persistence, desc: "extension {:?} has path characters", ext)?;
    }

    Ok(format!("{}-{}.{}", info.id, info.poster, ext))
}

fn from_file_name(file_name: &str) -> Result<PostInfo> {
    let parts = file_name
        .split_once('-')
        .and_then(|(id, rest)| rest.split_once('.').map(|(poster, ext)| (id, poster, ext)));

    match parts {
        Some((id, poster, extension)) if is_word(poster) => match id.parse::<i64>() {
            Ok(id) => {
                let (poster, extension) = (poster.to_string(), extension.to_string());
                Ok(PostInfo { id, poster, extension })
            }
            Err(err) => err!(Persistence, cause: err, "post file {:?}", file_name),
        },
        _ => err!(Persistence, desc: "post file {:?}", file_name),
    }
}

fn to_meta_name(file_name: &str) -> ffi::OsString {
    let mut meta = ffi::OsString::from(file_name);
    meta.push(".");
    meta.push(META_EXT);
    meta
}

#[cfg(test)]
#[path = "filesystem_test.rs"]
mod filesystem_test;
