use crate::kdtree::{
    build::tree_stats,
    types::{BuildMethod, KdTreeConfig, KdTreeError, NodeContent},
    KdTree, PreparedTree,
};
use crate::arena::Arena;
use crate::spatial::{math::Axis, Aabb, Scalar, V3c};
use crate::triangle::{Triangle, TriangleStore};
use bendy::{
    decoding::{Decoder, FromBencode, ListDecoder, Object},
    encoding::{Encoder, Error as BencodeError, SingleItemEncoder, ToBencode},
};
use memmap2::Mmap;
use std::{fs::File, io::Write, path::Path};

const CACHE_MAGIC: &str = "trikd";
const CACHE_VERSION: u32 = 1;

/// Marks the payload list of caches saved without payloads
const NO_PAYLOADS: &str = "#";

/// First word of a leaf in the node array; internal nodes store their axis there
pub(super) const LEAF_TAG: u32 = 3;

fn byte_order_tag() -> &'static str {
    if cfg!(target_endian = "little") {
        "le"
    } else {
        "be"
    }
}

///####################################################################################
/// Configuration
///####################################################################################
impl ToBencode for BuildMethod {
    const MAX_DEPTH: usize = 1;
    fn encode(&self, encoder: SingleItemEncoder) -> Result<(), BencodeError> {
        encoder.emit_str(self.tag())
    }
}

impl FromBencode for BuildMethod {
    fn decode_bencode_object(data: Object) -> Result<Self, bendy::decoding::Error> {
        let tag = String::decode_bencode_object(data)?;
        BuildMethod::from_tag(&tag).ok_or_else(|| {
            bendy::decoding::Error::unexpected_token("A build method, either fast or optimal", tag)
        })
    }
}

impl ToBencode for KdTreeConfig {
    const MAX_DEPTH: usize = 2;
    fn encode(&self, encoder: SingleItemEncoder) -> Result<(), BencodeError> {
        encoder.emit_list(|e| {
            e.emit(self.method)?;
            e.emit_int(self.max_leaf_size)?;
            e.emit_int(self.max_depth.unwrap_or(0))?;
            e.emit_int(self.traversal_cost.to_bits())?;
            e.emit_int(self.intersection_cost.to_bits())?;
            e.emit_int(self.sah_bins)
        })
    }
}

fn next_config_field<'item, 'ser>(
    list: &'item mut ListDecoder<'_, 'ser>,
) -> Result<Object<'item, 'ser>, bendy::decoding::Error> {
    list.next_object()?.ok_or_else(|| {
        bendy::decoding::Error::unexpected_token("A kd-tree configuration field", "End of list")
    })
}

impl FromBencode for KdTreeConfig {
    fn decode_bencode_object(data: Object) -> Result<Self, bendy::decoding::Error> {
        match data {
            Object::List(mut list) => {
                let method = BuildMethod::decode_bencode_object(next_config_field(&mut list)?)?;
                let max_leaf_size = usize::decode_bencode_object(next_config_field(&mut list)?)?;
                let max_depth = match u32::decode_bencode_object(next_config_field(&mut list)?)? {
                    0 => None,
                    depth => Some(depth),
                };
                let traversal_cost =
                    f64::from_bits(u64::decode_bencode_object(next_config_field(&mut list)?)?);
                let intersection_cost =
                    f64::from_bits(u64::decode_bencode_object(next_config_field(&mut list)?)?);
                let sah_bins = usize::decode_bencode_object(next_config_field(&mut list)?)?;
                Ok(Self {
                    method,
                    max_leaf_size,
                    max_depth,
                    traversal_cost,
                    intersection_cost,
                    sah_bins,
                })
            }
            _ => Err(bendy::decoding::Error::unexpected_token("List", "not List")),
        }
    }
}

///####################################################################################
/// Cache image
///####################################################################################
/// Node words and split positions of every node, in arena order
pub(super) fn flatten_nodes<T: Scalar>(nodes: &Arena<NodeContent<T>>) -> (Vec<u32>, Vec<T>) {
    let mut node_words = Vec::with_capacity(nodes.len() * 3);
    let mut splits = Vec::with_capacity(nodes.len());
    for node in nodes.iter() {
        match *node {
            NodeContent::Leaf { start, len } => {
                node_words.extend([LEAF_TAG, start, len]);
                splits.push(T::zero());
            }
            NodeContent::Internal {
                axis,
                split,
                near,
                far,
            } => {
                node_words.extend([axis.index() as u32, near, far]);
                splits.push(split);
            }
        }
    }
    (node_words, splits)
}

/// Layout of the encoded tree, a single list of:
/// magic, version, precision bits, byte order, configuration, triangle count, node count,
/// bounds, vertices, node words, split positions, leaf triangle indices, payloads.
/// Arrays are raw byte strings in the native byte order; node words are three `u32` per node:
/// the split axis or [`LEAF_TAG`], then the near and far child keys or the leaf range.
fn encode_image<P, T: Scalar>(
    tree: &KdTree<P, T>,
    prepared: &PreparedTree<T>,
    encoder: SingleItemEncoder,
    emit_payloads: impl FnOnce(&mut Encoder) -> Result<(), BencodeError>,
) -> Result<(), BencodeError> {
    let (node_words, splits) = flatten_nodes(&prepared.nodes);
    let bounds = [prepared.bounds.min.to_array(), prepared.bounds.max.to_array()].concat();
    let vertices = tree
        .triangles()
        .triangles()
        .iter()
        .flat_map(|triangle| triangle.vertices().iter().flat_map(|vertex| vertex.to_array()))
        .collect::<Vec<T>>();

    encoder.emit_list(|e| {
        e.emit_str(CACHE_MAGIC)?;
        e.emit_int(CACHE_VERSION)?;
        e.emit_int(T::BITS)?;
        e.emit_str(byte_order_tag())?;
        e.emit(tree.config())?;
        e.emit_int(tree.len())?;
        e.emit_int(prepared.nodes.len())?;
        e.emit_bytes(bytemuck::cast_slice(&bounds))?;
        e.emit_bytes(bytemuck::cast_slice(&vertices))?;
        e.emit_bytes(bytemuck::cast_slice(&node_words))?;
        e.emit_bytes(bytemuck::cast_slice(&splits))?;
        e.emit_bytes(bytemuck::cast_slice(prepared.leaf_triangles.as_slice()))?;
        emit_payloads(e)
    })
}

struct CacheImage<'a, P, T: Scalar> {
    tree: &'a KdTree<P, T>,
    prepared: &'a PreparedTree<T>,
}

impl<P: ToBencode, T: Scalar> ToBencode for CacheImage<'_, P, T> {
    const MAX_DEPTH: usize = P::MAX_DEPTH + 3;
    fn encode(&self, encoder: SingleItemEncoder) -> Result<(), BencodeError> {
        encode_image(self.tree, self.prepared, encoder, |e| {
            e.emit_list(|e| {
                for payload in self.tree.triangles().payloads() {
                    e.emit(payload)?;
                }
                Ok(())
            })
        })
    }
}

struct StrippedCacheImage<'a, P, T: Scalar> {
    tree: &'a KdTree<P, T>,
    prepared: &'a PreparedTree<T>,
}

impl<P, T: Scalar> ToBencode for StrippedCacheImage<'_, P, T> {
    const MAX_DEPTH: usize = 3;
    fn encode(&self, encoder: SingleItemEncoder) -> Result<(), BencodeError> {
        encode_image(self.tree, self.prepared, encoder, |e| e.emit_str(NO_PAYLOADS))
    }
}

///####################################################################################
/// Decoding
///####################################################################################
/// Provides the payloads of a tree being decoded
trait PayloadSource<P> {
    fn payloads(self, data: Object, triangle_count: usize) -> Result<Vec<P>, KdTreeError>;
}

/// Payloads are decoded from the cache
struct CachedPayloads;

impl<P: FromBencode> PayloadSource<P> for CachedPayloads {
    fn payloads(self, data: Object, triangle_count: usize) -> Result<Vec<P>, KdTreeError> {
        if let Object::Bytes(_) = data {
            return Err(KdTreeError::invalid_cache(
                "the cache was saved without payloads",
            ));
        }
        let payloads = Vec::<P>::decode_bencode_object(data).map_err(decoding_error)?;
        if payloads.len() != triangle_count {
            return Err(KdTreeError::PayloadCountMismatch {
                expected: triangle_count,
                actual: payloads.len(),
            });
        }
        Ok(payloads)
    }
}

/// Payloads are given by the caller, the ones inside the cache are ignored
impl<P> PayloadSource<P> for Vec<P> {
    fn payloads(self, _data: Object, triangle_count: usize) -> Result<Vec<P>, KdTreeError> {
        if self.len() != triangle_count {
            return Err(KdTreeError::PayloadCountMismatch {
                expected: triangle_count,
                actual: self.len(),
            });
        }
        Ok(self)
    }
}

fn decoding_error(error: bendy::decoding::Error) -> KdTreeError {
    KdTreeError::invalid_cache(error.to_string())
}

fn next_field<'item, 'ser>(
    list: &'item mut ListDecoder<'_, 'ser>,
    field: &str,
) -> Result<Object<'item, 'ser>, KdTreeError> {
    list.next_object()
        .map_err(decoding_error)?
        .ok_or_else(|| KdTreeError::invalid_cache(format!("missing field: {field}")))
}

fn next_value<V: FromBencode>(list: &mut ListDecoder, field: &str) -> Result<V, KdTreeError> {
    V::decode_bencode_object(next_field(list, field)?)
        .map_err(|error| KdTreeError::invalid_cache(format!("{field}: {error}")))
}

fn next_bytes<'ser>(list: &mut ListDecoder<'_, 'ser>, field: &str) -> Result<&'ser [u8], KdTreeError> {
    match next_field(list, field)? {
        Object::Bytes(bytes) => Ok(bytes),
        _ => Err(KdTreeError::invalid_cache(format!(
            "{field} is not a byte string"
        ))),
    }
}

/// Reinterprets the bytes as an array of `expected_len` values
fn next_array<V: bytemuck::Pod>(
    list: &mut ListDecoder,
    field: &str,
    expected_len: Option<usize>,
) -> Result<Vec<V>, KdTreeError> {
    let bytes = next_bytes(list, field)?;
    let value_size = std::mem::size_of::<V>();
    if 0 != bytes.len() % value_size {
        return Err(KdTreeError::invalid_cache(format!(
            "{field} is truncated"
        )));
    }
    if let Some(expected_len) = expected_len {
        if bytes.len() / value_size != expected_len {
            return Err(KdTreeError::invalid_cache(format!(
                "{field} holds {} values instead of {expected_len}",
                bytes.len() / value_size
            )));
        }
    }
    Ok(bytemuck::pod_collect_to_vec(bytes))
}

/// Rebuilds the node arena from its words, making sure every key and range points inside the tree.
/// Children are required to follow their parents, which also rules out cycles.
fn decode_nodes<T: Scalar>(
    node_words: &[u32],
    splits: &[T],
    leaf_triangles: &[u32],
    triangle_count: usize,
) -> Result<Vec<NodeContent<T>>, KdTreeError> {
    let node_count = splits.len();
    let mut nodes = Vec::new();
    nodes
        .try_reserve(node_count)
        .map_err(|_| KdTreeError::ResourceExhausted("kd-tree nodes"))?;

    for (index, (words, split)) in node_words.chunks_exact(3).zip(splits).enumerate() {
        let node = match (words[0], Axis::from_index(words[0])) {
            (LEAF_TAG, _) => {
                let (start, len) = (words[1], words[2]);
                if start as usize + len as usize > leaf_triangles.len() {
                    return Err(KdTreeError::invalid_cache(format!(
                        "leaf {index} refers outside of the leaf index array"
                    )));
                }
                NodeContent::Leaf { start, len }
            }
            (_, Some(axis)) => {
                let (near, far) = (words[1], words[2]);
                let is_forward = |child: u32| index < child as usize && (child as usize) < node_count;
                if !is_forward(near) || !is_forward(far) || !split.is_finite() {
                    return Err(KdTreeError::invalid_cache(format!(
                        "node {index} has invalid children or split position"
                    )));
                }
                NodeContent::Internal {
                    axis,
                    split: *split,
                    near,
                    far,
                }
            }
            (tag, None) => {
                return Err(KdTreeError::invalid_cache(format!(
                    "node {index} has an unknown tag: {tag}"
                )))
            }
        };
        nodes.push(node);
    }

    if let Some(index) = leaf_triangles
        .iter()
        .find(|index| **index as usize >= triangle_count)
    {
        return Err(KdTreeError::invalid_cache(format!(
            "leaf refers to triangle {index}, but the cache holds only {triangle_count}"
        )));
    }
    Ok(nodes)
}

fn decode_cache<P, T: Scalar>(
    bytes: &[u8],
    payload_source: impl PayloadSource<P>,
) -> Result<KdTree<P, T>, KdTreeError> {
    let mut decoder = Decoder::new(bytes);
    let mut list = match decoder.next_object().map_err(decoding_error)? {
        Some(Object::List(list)) => list,
        _ => return Err(KdTreeError::invalid_cache("not a kd-tree cache")),
    };

    let magic = next_bytes(&mut list, "magic")?;
    if magic != CACHE_MAGIC.as_bytes() {
        return Err(KdTreeError::invalid_cache("not a kd-tree cache"));
    }
    let version = next_value::<u32>(&mut list, "version")?;
    if CACHE_VERSION != version {
        return Err(KdTreeError::invalid_cache(format!(
            "unsupported version {version}"
        )));
    }
    let bits = next_value::<u32>(&mut list, "precision")?;
    if T::BITS != bits {
        return Err(KdTreeError::PrecisionMismatch {
            expected: T::BITS,
            found: bits,
        });
    }
    if next_bytes(&mut list, "byte order")? != byte_order_tag().as_bytes() {
        return Err(KdTreeError::invalid_cache(
            "the cache was written with a different byte order",
        ));
    }
    let config = next_value::<KdTreeConfig>(&mut list, "configuration")?;
    config
        .validate()
        .map_err(|error| KdTreeError::invalid_cache(error.to_string()))?;

    let triangle_count = next_value::<usize>(&mut list, "triangle count")?;
    let node_count = next_value::<usize>(&mut list, "node count")?;
    if 0 == node_count {
        return Err(KdTreeError::invalid_cache("the tree has no root node"));
    }
    let vertex_values = triangle_count
        .checked_mul(9)
        .ok_or_else(|| KdTreeError::invalid_cache("triangle count is out of range"))?;
    let word_count = node_count
        .checked_mul(3)
        .ok_or_else(|| KdTreeError::invalid_cache("node count is out of range"))?;

    let bounds = next_array::<T>(&mut list, "bounds", Some(6))?;
    let vertices = next_array::<T>(&mut list, "vertices", Some(vertex_values))?;
    let node_words = next_array::<u32>(&mut list, "nodes", Some(word_count))?;
    let splits = next_array::<T>(&mut list, "split positions", Some(node_count))?;
    let leaf_triangles = next_array::<u32>(&mut list, "leaf triangles", None)?;

    let mut triangles = Vec::new();
    triangles
        .try_reserve(triangle_count)
        .map_err(|_| KdTreeError::ResourceExhausted("triangles"))?;
    for (index, values) in vertices.chunks_exact(9).enumerate() {
        let vertex = |i: usize| V3c::new(values[i * 3], values[i * 3 + 1], values[i * 3 + 2]);
        triangles.push(
            Triangle::new([vertex(0), vertex(1), vertex(2)]).ok_or_else(|| {
                KdTreeError::invalid_cache(format!("triangle {index} is degenerate"))
            })?,
        );
    }

    let nodes = decode_nodes(&node_words, &splits, &leaf_triangles, triangle_count)?;
    let payloads = payload_source.payloads(next_field(&mut list, "payloads")?, triangle_count)?;
    if list.next_object().map_err(decoding_error)?.is_some() {
        return Err(KdTreeError::invalid_cache("unexpected trailing fields"));
    }

    let bounds = Aabb::new(
        V3c::new(bounds[0], bounds[1], bounds[2]),
        V3c::new(bounds[3], bounds[4], bounds[5]),
    );
    let nodes = Arena::from_vec("kd-tree nodes", nodes);
    let stats = tree_stats(&nodes, &bounds, &config);
    let prepared = PreparedTree {
        nodes,
        leaf_triangles: Arena::from_vec("kd-tree leaves", leaf_triangles),
        bounds,
        stats,
    };
    log::debug!(
        "Decoded kd-tree cache: {} triangles, {} nodes",
        triangle_count,
        node_count
    );
    Ok(KdTree::from_prepared(
        config,
        TriangleStore::from_parts(triangles, payloads)?,
        prepared,
    ))
}

fn rejected<R>(result: Result<R, KdTreeError>) -> Result<R, KdTreeError> {
    result.map_err(|error| {
        log::warn!("kd-tree cache rejected: {error}");
        error
    })
}

///####################################################################################
/// KdTree
///####################################################################################
impl<P, T: Scalar> KdTree<P, T> {
    /// converts the prepared tree and its payloads into a byte string
    pub fn to_bytes(&self) -> Result<Vec<u8>, KdTreeError>
    where
        P: ToBencode,
    {
        let image = CacheImage {
            tree: self,
            prepared: self.prepared()?,
        };
        let bytes = image
            .to_bencode()
            .map_err(|error| KdTreeError::invalid_cache(error.to_string()))?;
        log::debug!(
            "Encoded kd-tree of {} triangles into {} bytes",
            self.len(),
            bytes.len()
        );
        Ok(bytes)
    }

    /// converts the prepared tree into a byte string, leaving out the payloads;
    /// they need to be supplied again when decoding
    pub fn to_bytes_without_payloads(&self) -> Result<Vec<u8>, KdTreeError> {
        let image = StrippedCacheImage {
            tree: self,
            prepared: self.prepared()?,
        };
        let bytes = image
            .to_bencode()
            .map_err(|error| KdTreeError::invalid_cache(error.to_string()))?;
        log::debug!(
            "Encoded kd-tree of {} triangles into {} bytes without payloads",
            self.len(),
            bytes.len()
        );
        Ok(bytes)
    }

    /// parses a prepared tree with its payloads from a byte string
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KdTreeError>
    where
        P: FromBencode,
    {
        rejected(decode_cache(bytes, CachedPayloads))
    }

    /// parses a prepared tree from a byte string, with one payload given for every triangle in insertion order
    pub fn from_bytes_with_payloads(bytes: &[u8], payloads: Vec<P>) -> Result<Self, KdTreeError> {
        rejected(decode_cache(bytes, payloads))
    }

    /// saves the prepared tree to the given file path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), KdTreeError>
    where
        P: ToBencode,
    {
        let bytes = self.to_bytes()?;
        File::create(path)?.write_all(&bytes)?;
        Ok(())
    }

    /// saves the prepared tree to the given file path without its payloads
    pub fn save_without_payloads(&self, path: impl AsRef<Path>) -> Result<(), KdTreeError> {
        let bytes = self.to_bytes_without_payloads()?;
        File::create(path)?.write_all(&bytes)?;
        Ok(())
    }

    /// loads a prepared tree from the given file path
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KdTreeError>
    where
        P: FromBencode,
    {
        let map = map_file(path.as_ref())?;
        Self::from_bytes(&map)
    }

    /// loads a prepared tree from the given file path, with one payload given for every triangle
    pub fn load_with_payloads(path: impl AsRef<Path>, payloads: Vec<P>) -> Result<Self, KdTreeError> {
        let map = map_file(path.as_ref())?;
        Self::from_bytes_with_payloads(&map, payloads)
    }
}

fn map_file(path: &Path) -> Result<Mmap, KdTreeError> {
    let file = File::open(path)?;
    if 0 == file.metadata()?.len() {
        return rejected(Err(KdTreeError::invalid_cache("the cache file is empty")));
    }
    // The mapping is only read while decoding, and dropped right after
    Ok(unsafe { Mmap::map(&file)? })
}
