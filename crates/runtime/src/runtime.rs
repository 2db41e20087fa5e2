use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use cacheindex::Index;
use collective::{ProcessGroup, ReduceOp};
use config::Params;
use fileio::{copy_file, file_size, is_readable, mkdir_p};
use filemap::{FileMap, SCAVENGE_KEY_CONTAINER, SCAVENGE_KEY_PARTNER, SCAVENGE_KEY_PRESERVE};
use kvtree::KvTree;
use metadata::{Dataset, DatasetFlags, FileKind, Meta};
use pathseq::PathSeq;
use redundancy::{Descriptor, Scheme, partner, xor};
use scan::{RebuildRunner, inspect, scan_files, summarize_dataset};
use summary::{Summary, write_summary};

use crate::error::{RuntimeError, RuntimeResult};

/// Key under which the master control file lists the per-rank map files.
const MASTER_KEY_FILEMAP: &str = "Filemap";
/// Name of the master control file.
const MASTER_FILE: &str = "filemap.scrinfo";

/// Locations the runtime works in; normally derived from parameters, passed
/// explicitly by tools and tests.
#[derive(Clone, Debug)]
pub struct RuntimeOptions {
    /// Shared prefix directory on the parallel file system.
    pub prefix: PathBuf,
    /// Node-local base for dataset caches.
    pub cache_base: PathBuf,
    /// Node-local control directory holding file maps.
    pub cntl_dir: PathBuf,
}

/// The window the runtime currently has open.
#[derive(Debug)]
enum Window {
    Idle,
    Output {
        id: i64,
        name: String,
        dir: PathBuf,
        dataset: Dataset,
        bypass: bool,
    },
    Restart {
        id: i64,
        name: String,
        dir: PathBuf,
        map: FileMap,
    },
}

/// Process-scope state of the checkpoint/restart layer.
///
/// All entry points must be called collectively by every member of the
/// group, from the thread that owns the group handle.
#[derive(Debug)]
pub struct Runtime<G: ProcessGroup> {
    group: G,
    params: Params,
    prefix: PathBuf,
    cache_base: PathBuf,
    cntl_dir: PathBuf,
    map: FileMap,
    window: Window,
    dataset_counter: i64,
    ckpt_counter: i64,
    need_count: i64,
    last_checkpoint: Instant,
    // newest completed checkpoint the flush pacing left in cache
    pending_flush: Option<(i64, String)>,
}

fn now_usecs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

fn basename(name: &str) -> String {
    let mut p = PathSeq::from(name);
    p.basename();
    p.to_string()
}

impl<G: ProcessGroup> Runtime<G> {
    /// Initializes the runtime: loads config files, prepares the cache and
    /// control directories, reloads this rank's file map, and agrees on the
    /// next dataset id. Collective.
    pub fn init(group: G, mut params: Params, options: RuntimeOptions) -> RuntimeResult<Self> {
        let system_conf = Path::new("/etc/scr/scr.conf");
        if is_readable(system_conf) {
            params.load_system_file(system_conf)?;
        }
        if let Ok(user_conf) = std::env::var("SCR_CONF_FILE") {
            let user_conf = Path::new(&user_conf);
            if is_readable(user_conf) {
                params.load_user_file(user_conf)?;
            }
        } else {
            let user_conf = options.prefix.join(".scrconf");
            if is_readable(&user_conf) {
                params.load_user_file(&user_conf)?;
            }
        }

        mkdir_p(&options.cntl_dir)?;
        mkdir_p(&options.cache_base)?;
        mkdir_p(&options.prefix)?;

        let rank = group.rank() as i64;
        let mut map = FileMap::new();
        let map_path = options.cntl_dir.join(format!("{rank}.scrfilemap"));
        if is_readable(&map_path) {
            map.read(&map_path)?;
        }

        // register this rank's map file in the master control file
        let master_path = options.cntl_dir.join(MASTER_FILE);
        let (lock, mut master) = KvTree::lock_open_read(&master_path)?;
        master.set_kv(MASTER_KEY_FILEMAP, map_path.to_string_lossy());
        master.write_unlock(lock)?;

        let local_latest = map.latest_dataset().unwrap_or(0);
        let dataset_counter = group.allreduce(local_latest, ReduceOp::Max)?;

        let local_ckpt = map
            .list_datasets()
            .into_iter()
            .filter_map(|d| map.get_dataset(d, rank).and_then(|ds| ds.checkpoint()))
            .max()
            .unwrap_or(0);
        let ckpt_counter = group.allreduce(local_ckpt, ReduceOp::Max)?;

        tracing::debug!(
            rank,
            dataset_counter,
            ckpt_counter,
            prefix = %options.prefix.display(),
            "runtime initialized"
        );
        Ok(Self {
            group,
            params,
            prefix: options.prefix,
            cache_base: options.cache_base,
            cntl_dir: options.cntl_dir,
            map,
            window: Window::Idle,
            dataset_counter,
            ckpt_counter,
            need_count: 0,
            last_checkpoint: Instant::now(),
            pending_flush: None,
        })
    }

    /// Applies a `KEY=VALUE …` directive to the parameter store.
    pub fn config(&mut self, directive: &str) -> RuntimeResult<()> {
        self.params.set(directive)?;
        Ok(())
    }

    /// Answers a parameter query (`KEY`, or qualified `KEY=VALUE … KEY`).
    #[must_use]
    pub fn param(&self, query: &str) -> Option<String> {
        self.params.get(query)
    }

    /// This member's rank.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.group.rank()
    }

    /// Group size.
    #[must_use]
    pub fn ranks(&self) -> usize {
        self.group.size()
    }

    /// Checkpoint-descriptor parameters (`CKPT=0 TYPE=… SET_SIZE=…`) win
    /// over the flat `SCR_*` keys.
    fn ckpt_param(&self, sub_key: &str, flat_key: &str) -> Option<String> {
        self.params
            .get(&format!("CKPT=0 {sub_key}"))
            .or_else(|| self.params.get(flat_key))
    }

    fn scheme(&self) -> Scheme {
        self.ckpt_param("TYPE", "SCR_COPY_TYPE")
            .as_deref()
            .and_then(Scheme::parse)
            .unwrap_or(Scheme::Xor)
    }

    fn set_size(&self) -> usize {
        self.ckpt_param("SET_SIZE", "SCR_SET_SIZE")
            .and_then(|v| v.parse::<i64>().ok())
            .map_or(8, |v| v.max(2) as usize)
    }

    fn cache_bypass(&self) -> bool {
        self.params.get_flag("SCR_CACHE_BYPASS").unwrap_or(false)
    }

    /// Flush every Nth checkpoint; `0` disables periodic flushing so
    /// checkpoints stay cache-only until a scavenge or an output dataset.
    fn flush_every(&self) -> i64 {
        self.params.get_int("SCR_FLUSH").unwrap_or(1).max(0)
    }

    fn cache_size(&self) -> usize {
        self.params
            .get_int("SCR_CACHE_SIZE")
            .map_or(1, |v| v.max(1) as usize)
    }

    fn crc_on_flush(&self) -> bool {
        self.params.get_flag("SCR_CRC_ON_FLUSH").unwrap_or(true)
    }

    fn rank_cache_dir(&self) -> PathBuf {
        self.cache_base.join(format!("rank.{}", self.group.rank()))
    }

    fn dataset_cache_dir(&self, id: i64) -> PathBuf {
        self.rank_cache_dir().join(format!("scr.dataset.{id}"))
    }

    fn map_path(&self) -> PathBuf {
        self.cntl_dir
            .join(format!("{}.scrfilemap", self.group.rank()))
    }

    fn persist_map(&self) -> RuntimeResult<()> {
        self.map.write(&self.map_path())?;
        Ok(())
    }

    /// Decides whether the application should take a checkpoint now.
    ///
    /// Rank 0 applies the interval and seconds policies and broadcasts the
    /// answer. With no policy configured, every call says yes.
    pub fn need_checkpoint(&mut self) -> RuntimeResult<bool> {
        self.need_count += 1;
        let decision = if self.group.rank() == 0 {
            let interval = self
                .ckpt_param("INTERVAL", "SCR_CHECKPOINT_INTERVAL")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let seconds = self.params.get_int("SCR_CHECKPOINT_SECONDS").unwrap_or(0);
            let mut need = interval == 0 && seconds == 0;
            if interval > 0 && self.need_count % interval == 0 {
                need = true;
            }
            if seconds > 0 && self.last_checkpoint.elapsed().as_secs() >= seconds as u64 {
                need = true;
            }
            i64::from(need)
        } else {
            0
        };
        let mut payload = decision.to_le_bytes().to_vec();
        self.group.broadcast(0, &mut payload)?;
        let bytes: [u8; 8] = payload.as_slice().try_into().unwrap_or([0; 8]);
        Ok(i64::from_le_bytes(bytes) != 0)
    }

    /// Opens an output window: allocates the next dataset id the group
    /// agrees on, creates the cache directory, and records the dataset in
    /// the file map. Collective.
    pub fn start_output(&mut self, name: &str, flags: DatasetFlags) -> RuntimeResult<i64> {
        if !matches!(self.window, Window::Idle) {
            return Err(RuntimeError::State(
                "start_output inside an open window".to_owned(),
            ));
        }

        let id = self
            .group
            .allreduce(self.dataset_counter + 1, ReduceOp::Max)?;
        self.dataset_counter = id;
        if flags.checkpoint {
            self.ckpt_counter += 1;
        }

        let name = if name.is_empty() {
            format!("scr.dataset.{id}")
        } else {
            name.to_owned()
        };

        let mut dataset = Dataset::new();
        dataset.set_id(id);
        dataset.set_name(&name);
        dataset.set_created(now_usecs());
        dataset.set_flags(flags);
        if flags.checkpoint {
            dataset.set_checkpoint(self.ckpt_counter);
        }
        if let Ok(user) = std::env::var("USER") {
            dataset.set_user(&user);
        }
        if let Some(jobid) = self.params.get("SCR_JOB_ID") {
            dataset.set_jobid(&jobid);
        }
        if let Some(cluster) = self.params.get("SCR_CLUSTER_NAME") {
            dataset.set_cluster(&cluster);
        }

        // bypass mode writes straight to the prefix directory, skipping
        // node-local cache and redundancy
        let bypass = self.cache_bypass();
        let dir = if bypass {
            self.prefix.join(&name)
        } else {
            self.dataset_cache_dir(id)
        };
        mkdir_p(&dir)?;

        let rank = self.group.rank() as i64;
        self.map.set_dataset(id, rank, &dataset);

        let mut flushdesc = KvTree::new();
        flushdesc.set_int(SCAVENGE_KEY_PRESERVE, 0);
        flushdesc.set_int(SCAVENGE_KEY_CONTAINER, 0);
        self.map.set_flushdesc(id, rank, &flushdesc);
        self.persist_map()?;

        tracing::info!(id, %name, bypass, "output window opened");
        self.window = Window::Output {
            id,
            name,
            dir,
            dataset,
            bypass,
        };
        Ok(id)
    }

    /// Translates a user-visible file name into the path the application
    /// must actually use. Idempotent within a window.
    pub fn route_file(&mut self, name: &str) -> RuntimeResult<PathBuf> {
        match &self.window {
            Window::Output { id, dir, .. } => {
                let id = *id;
                let base = basename(name);
                let routed = dir.join(&base);
                let routed_str = routed.to_string_lossy().to_string();

                let rank = self.group.rank() as i64;
                self.map.add_file(id, rank, &routed_str);
                if self.map.get_meta(id, rank, &routed_str).is_none() {
                    let mut meta = Meta::new();
                    meta.set_orig(name);
                    meta.set_orig_name(&base);
                    let mut dirpart = PathSeq::from(name);
                    dirpart.dirname();
                    meta.set_orig_path(&dirpart.to_string());
                    meta.set_rank(rank);
                    meta.set_ranks(self.group.size() as i64);
                    meta.set_checkpoint(self.ckpt_counter);
                    meta.set_kind(FileKind::User);
                    meta.set_complete(false);
                    self.map.set_meta(id, rank, &routed_str, &meta);
                    self.persist_map()?;
                }
                Ok(routed)
            }
            Window::Restart { dir, map, id, .. } => {
                let rank = self.group.rank() as i64;
                let base = basename(name);
                for rel in map.list_files(*id, rank) {
                    let Some(meta) = map.get_meta(*id, rank, &rel) else {
                        continue;
                    };
                    if meta.orig() == Some(name) || meta.orig_name() == Some(base.as_str()) {
                        return Ok(dir.join(rel));
                    }
                }
                Err(RuntimeError::State(format!(
                    "no restart file routes to {name}"
                )))
            }
            Window::Idle => Err(RuntimeError::State(
                "route_file outside an open window".to_owned(),
            )),
        }
    }

    /// Seals the open output window.
    ///
    /// Validity is all-reduced; on group success the redundancy scheme
    /// runs, checkpoint data is flushed to the prefix directory, and the
    /// index is updated. The window closes either way so no rank is left
    /// half-open. Returns whether the dataset completed. Collective.
    pub fn complete_output(&mut self, valid: bool) -> RuntimeResult<bool> {
        let Window::Output {
            id,
            name,
            dir,
            mut dataset,
            bypass,
        } = std::mem::replace(&mut self.window, Window::Idle)
        else {
            return Err(RuntimeError::State(
                "complete_output without an output window".to_owned(),
            ));
        };

        let rank = self.group.rank() as i64;
        let crc_wanted = self.crc_on_flush();

        // finalize the meta record of every routed file
        let mut my_valid = valid;
        let files = self.map.list_files(id, rank);
        for file in &files {
            let Some(mut meta) = self.map.get_meta(id, rank, file) else {
                my_valid = false;
                continue;
            };
            let path = Path::new(file);
            if !is_readable(path) {
                my_valid = false;
                meta.set_complete(false);
            } else {
                meta.set_filesize(file_size(path));
                if crc_wanted {
                    meta.set_crc32(fileio::crc32_file(path)?);
                }
                meta.set_complete(valid);
            }
            self.map.set_meta(id, rank, file, &meta);
        }

        let group_valid = self.group.agree(my_valid)?;

        if group_valid && !bypass {
            self.apply_redundancy(id, &dir, &dataset)?;
        }

        dataset.set_complete(group_valid);
        let total_files = self.group.allreduce(files.len() as i64, ReduceOp::Sum)?;
        dataset.set_files(total_files);
        let my_bytes: i64 = files
            .iter()
            .filter_map(|f| self.map.get_meta(id, rank, f))
            .filter_map(|m| m.filesize())
            .sum::<u64>() as i64;
        let total_bytes = self.group.allreduce(my_bytes, ReduceOp::Sum)?;
        dataset.set_size(total_bytes as u64);

        self.map.set_dataset(id, rank, &dataset);
        let count = self.map.num_files(id, rank) as i64;
        self.map.set_expected_files(id, rank, count);
        self.persist_map()?;

        if group_valid {
            // outputs and bypass datasets must reach the prefix directory;
            // checkpoints follow the flush pacing
            let every = self.flush_every();
            let flush_now = bypass
                || dataset.is_output()
                || (dataset.is_ckpt() && every > 0 && self.ckpt_counter % every == 0);
            if flush_now {
                self.flush_dataset(id, &name, &dataset, bypass)?;
            }
            if dataset.is_ckpt() {
                // a newer restart point supersedes any older unflushed one
                self.pending_flush = if flush_now {
                    None
                } else {
                    Some((id, name.clone()))
                };
            }
            self.evict_old_datasets(id)?;
            self.last_checkpoint = Instant::now();
        } else {
            tracing::warn!(id, "dataset closed incomplete");
        }

        self.group.barrier()?;
        Ok(group_valid)
    }

    fn apply_redundancy(&mut self, id: i64, dir: &Path, dataset: &Dataset) -> RuntimeResult<()> {
        let scheme = self.scheme();
        let rank = self.group.rank() as i64;
        let size = self.group.size();
        if size < 2 || scheme == Scheme::Single {
            let desc = Descriptor::single();
            self.map.set_desc(id, rank, &desc.to_tree());
            return Ok(());
        }

        let set = xor::XorSet::contiguous(self.group.rank(), size, self.set_size());
        let desc = Descriptor {
            scheme,
            groups: (size as i64) / (set.size() as i64).max(1),
            group_id: set.set_id,
            group_size: set.size() as i64,
            group_rank: set.index as i64,
            set_size: self.set_size() as i64,
        };
        self.map.set_desc(id, rank, &desc.to_tree());

        let files: Vec<(PathBuf, Meta)> = self
            .map
            .list_files(id, rank)
            .into_iter()
            .filter_map(|f| {
                self.map
                    .get_meta(id, rank, &f)
                    .map(|m| (PathBuf::from(f), m))
            })
            .collect();

        match scheme {
            Scheme::Single => {}
            Scheme::Xor => {
                let xor_path = dir.join(xor::xor_file_name(set.index, set.size(), set.set_id));
                let ctx = xor::EncodeContext {
                    set: &set,
                    ranks: size as i64,
                    dataset,
                    dataset_dir: dir,
                    files,
                    xor_path: &xor_path,
                    chunk_size: None,
                };
                xor::encode(&self.group, &ctx)?;

                let xor_str = xor_path.to_string_lossy().to_string();
                let mut meta = Meta::new();
                meta.set_orig_name(
                    &xor_path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default(),
                );
                meta.set_kind(FileKind::Xor);
                meta.set_rank(rank);
                meta.set_ranks(size as i64);
                meta.set_filesize(file_size(&xor_path));
                if self.crc_on_flush() {
                    meta.set_crc32(fileio::crc32_file(&xor_path)?);
                }
                meta.set_complete(true);
                self.map.add_file(id, rank, &xor_str);
                self.map.set_meta(id, rank, &xor_str, &meta);
            }
            Scheme::Partner => {
                let ctx = partner::PartnerContext {
                    set: &set,
                    dataset,
                    dataset_dir: dir,
                    files,
                };
                let received = partner::encode(&self.group, &ctx)?;

                // the copies we now hold are scavenged on behalf of the
                // source rank when its node dies
                let partner_dir = dir.join(partner::partner_dir_name(received.rank));
                let mut flushdesc = KvTree::new();
                flushdesc.set_str(SCAVENGE_KEY_PARTNER, format!("rank.{}", received.rank));
                flushdesc.set_int(SCAVENGE_KEY_PRESERVE, 0);
                flushdesc.set_int(SCAVENGE_KEY_CONTAINER, 0);
                self.map.set_dataset(id, received.rank, dataset);
                self.map.set_flushdesc(id, received.rank, &flushdesc);
                for meta in &received.files {
                    let Some(name) = meta.orig_name().or_else(|| meta.orig()) else {
                        continue;
                    };
                    let copy = partner_dir.join(name).to_string_lossy().to_string();
                    self.map.add_file(id, received.rank, &copy);
                    self.map.set_meta(id, received.rank, &copy, meta);
                }
                self.map.set_expected_files(
                    id,
                    received.rank,
                    received.files.len() as i64,
                );

                // note who holds this rank's own copy
                if let Some(mut own) = self.map.get_flushdesc(id, rank) {
                    own.set_str(
                        SCAVENGE_KEY_PARTNER,
                        format!("rank.{}", set.right_rank()),
                    );
                    self.map.set_flushdesc(id, rank, &own);
                }
            }
        }
        Ok(())
    }

    /// Copies the dataset's user files to the prefix directory, writes the
    /// per-rank shard, and has rank 0 write the summary and index entry.
    ///
    /// In bypass mode the files are already in place and only the metadata
    /// is produced.
    fn flush_dataset(
        &mut self,
        id: i64,
        name: &str,
        dataset: &Dataset,
        bypass: bool,
    ) -> RuntimeResult<()> {
        let rank = self.group.rank() as i64;
        let dset_dir = self.prefix.join(name);
        let scr_dir = dset_dir.join(".scr");
        mkdir_p(&scr_dir)?;

        let buf_size = self
            .params
            .get_int("SCR_FILE_BUF_SIZE")
            .map_or(1024 * 1024, |v| v.max(4096) as usize);
        let crc_wanted = self.crc_on_flush();

        let mut shard = FileMap::new();
        shard.set_dataset(id, rank, dataset);
        let mut flushdesc = KvTree::new();
        flushdesc.set_int(SCAVENGE_KEY_PRESERVE, 0);
        flushdesc.set_int(SCAVENGE_KEY_CONTAINER, 0);
        shard.set_flushdesc(id, rank, &flushdesc);

        let mut flushed = 0i64;
        for file in self.map.list_files(id, rank) {
            let Some(mut meta) = self.map.get_meta(id, rank, &file) else {
                continue;
            };
            if !meta.check_kind(FileKind::User) {
                continue;
            }
            let Some(rel) = meta.orig_name().map(str::to_owned) else {
                continue;
            };
            if !bypass {
                let dst = dset_dir.join(&rel);
                let crc = copy_file(Path::new(&file), &dst, buf_size, crc_wanted)?;
                if let (Some(expected), Some(actual)) = (meta.crc32(), crc) {
                    if expected != actual {
                        tracing::error!(%file, "crc mismatch while flushing");
                        meta.set_complete(false);
                        self.map.set_meta(id, rank, &file, &meta);
                        continue;
                    }
                } else if let Some(actual) = crc {
                    meta.set_crc32(actual);
                }
            }

            shard.add_file(id, rank, &rel);
            shard.set_meta(id, rank, &rel, &meta);
            flushed += 1;
        }
        shard.set_expected_files(id, rank, flushed);
        shard.write(&scr_dir.join(format!("{rank}.scrfilemap")))?;

        self.group.barrier()?;

        if self.group.rank() == 0 {
            let scanned = scan_files(&dset_dir)?;
            let plans = inspect(&scanned);
            let complete = plans.len() == 1 && plans[0].is_complete();
            if let Some(entry) = scanned.datasets.get(&id) {
                write_summary(
                    &dset_dir,
                    &Summary {
                        dataset: dataset.clone(),
                        complete,
                    },
                    &entry.rank2file,
                )?;
            }

            let (lock, mut index) = Index::load_locked(&self.prefix)?;
            index.add(name, dataset, complete);
            index.mark_flushed(id, name)?;
            index.store_unlock(lock)?;
            tracing::info!(id, name, complete, "dataset flushed and indexed");
        }

        self.group.barrier()?;
        Ok(())
    }

    /// Drops cached datasets beyond the configured cache size, oldest
    /// first, never touching the one just written.
    fn evict_old_datasets(&mut self, current: i64) -> RuntimeResult<()> {
        let keep = self.cache_size();
        while self.map.num_datasets() > keep {
            let Some(oldest) = self.map.oldest_dataset(-1) else {
                break;
            };
            if oldest == current {
                break;
            }
            let rank_dirs: Vec<i64> = self.map.list_ranks_by_dataset(oldest);
            for r in rank_dirs {
                for file in self.map.list_files(oldest, r) {
                    // bypass datasets route straight to the prefix; never
                    // delete anything outside the cache
                    if Path::new(&file).starts_with(&self.cache_base) {
                        let _ = fileio::unlink(Path::new(&file));
                    }
                }
            }
            let dir = self.dataset_cache_dir(oldest);
            if dir.exists() {
                let _ = std::fs::remove_dir_all(&dir);
            }
            self.map.remove_dataset(oldest);
            if self.pending_flush.as_ref().is_some_and(|(id, _)| *id == oldest) {
                tracing::warn!(dataset = oldest, "evicted before it could be flushed");
                self.pending_flush = None;
            }
            tracing::info!(dataset = oldest, "evicted from cache");
        }
        self.persist_map()
    }

    /// Asks the index for the newest complete dataset that has not failed
    /// a fetch. Rank 0 consults the index; the answer is broadcast.
    pub fn have_restart(&mut self) -> RuntimeResult<Option<String>> {
        let mut payload = if self.group.rank() == 0 {
            let index = Index::read(&self.prefix)?;
            index
                .restart_candidate()
                .map(|entry| entry.dir)
                .unwrap_or_default()
                .into_bytes()
        } else {
            Vec::new()
        };
        self.group.broadcast(0, &mut payload)?;
        let name = String::from_utf8(payload).unwrap_or_default();
        Ok((!name.is_empty()).then_some(name))
    }

    /// Opens a restart window on the named dataset. Collective.
    pub fn start_restart(&mut self, name: &str) -> RuntimeResult<()> {
        if !matches!(self.window, Window::Idle) {
            return Err(RuntimeError::State(
                "start_restart inside an open window".to_owned(),
            ));
        }

        // a dataset that was scavenged but never summarized gets its
        // summary (and any single-member rebuilds) before anyone reads it
        if self.group.rank() == 0 {
            let dir = self.prefix.join(name);
            let has_shards = dir.join(".scr").is_dir();
            if has_shards && !is_readable(&dir.join(".scr").join("summary.scr")) {
                if let Err(err) = summarize_dataset(&dir, &RebuildRunner::InProcess) {
                    tracing::warn!(name, error = %err, "could not summarize dataset");
                }
            }
        }
        self.group.barrier()?;

        let mut payload = if self.group.rank() == 0 {
            let index = Index::read(&self.prefix)?;
            index.get_id_by_dir(name).unwrap_or(-1).to_le_bytes().to_vec()
        } else {
            Vec::new()
        };
        self.group.broadcast(0, &mut payload)?;
        let bytes: [u8; 8] = payload.as_slice().try_into().unwrap_or([0; 8]);
        let id = i64::from_le_bytes(bytes);

        let dir = self.prefix.join(name);
        let rank = self.group.rank() as i64;
        let mut map = FileMap::new();
        let shard_path = dir.join(".scr").join(format!("{rank}.scrfilemap"));
        if is_readable(&shard_path) {
            map.read(&shard_path)?;
        }

        tracing::info!(id, name, "restart window opened");
        self.window = Window::Restart {
            id,
            name: name.to_owned(),
            dir,
            map,
        };
        Ok(())
    }

    /// Closes the restart window. Validity is all-reduced; on failure rank
    /// 0 marks the dataset failed in the index so the next
    /// [`Runtime::have_restart`] skips it. Returns whether the restart
    /// succeeded. Collective.
    pub fn complete_restart(&mut self, valid: bool) -> RuntimeResult<bool> {
        let Window::Restart { id, name, map, .. } =
            std::mem::replace(&mut self.window, Window::Idle)
        else {
            return Err(RuntimeError::State(
                "complete_restart without a restart window".to_owned(),
            ));
        };

        // a rank with no shard at all cannot have read its files
        let rank = self.group.rank() as i64;
        let my_valid = valid && map.have_rank_by_dataset(id, rank);
        let group_valid = self.group.agree(my_valid)?;

        if self.group.rank() == 0 {
            let (lock, mut index) = Index::load_locked(&self.prefix)?;
            if group_valid {
                let _ = index.record_fetched(id, &name, &now_usecs().to_string());
            } else if let Err(err) = index.mark_failed(id, &name) {
                tracing::warn!(id, %name, error = %err, "could not mark failed restart");
            } else {
                tracing::warn!(id, %name, "restart failed; dataset marked");
            }
            index.store_unlock(lock)?;
        }
        self.group.barrier()?;
        Ok(group_valid)
    }

    /// Overrides the restart selection. Collective; rank 0 writes.
    pub fn current(&mut self, name: &str) -> RuntimeResult<()> {
        if self.group.rank() == 0 {
            let (lock, mut index) = Index::load_locked(&self.prefix)?;
            index.set_current(name)?;
            index.store_unlock(lock)?;
        }
        self.group.barrier()?;
        Ok(())
    }

    /// Flushes any pending dataset and releases runtime state. Collective.
    ///
    /// A window the application left open is driven through its normal
    /// completion path first: an open output closes as invalid (no rank
    /// ever vouched for its files), an open restart closes as failed. A
    /// checkpoint the flush pacing left in cache is flushed now, unless
    /// flushing is disabled outright.
    pub fn finalize(mut self) -> RuntimeResult<()> {
        match self.window {
            Window::Output { .. } => {
                tracing::warn!("output window still open at finalize; closing it as incomplete");
                self.complete_output(false)?;
            }
            Window::Restart { .. } => {
                tracing::warn!("restart window still open at finalize; closing it as failed");
                self.complete_restart(false)?;
            }
            Window::Idle => {}
        }

        if let Some((id, name)) = self.pending_flush.take() {
            if self.flush_every() > 0 {
                let rank = self.group.rank() as i64;
                if let Some(dataset) = self.map.get_dataset(id, rank) {
                    tracing::info!(id, %name, "flushing pending checkpoint at finalize");
                    self.flush_dataset(id, &name, &dataset, false)?;
                }
            }
        }

        self.persist_map()?;
        self.group.barrier()?;
        Ok(())
    }
}
